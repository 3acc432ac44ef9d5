//! Request/response log and its query helpers.

use crate::error::AssertionError;
use crate::matcher::{BytesRepr, RequestMatcher};
use crate::request::Request;
use crate::response::Response;

/// Append-only record of every dispatched request and the response sent.
#[derive(Default)]
pub(crate) struct RequestLog {
    entries: Vec<(Request, Response)>,
}

impl RequestLog {
    pub fn push(&mut self, request: Request, response: Response) {
        self.entries.push((request, response));
    }

    pub fn entries(&self) -> &[(Request, Response)] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn matching(&self, matcher: &RequestMatcher) -> Vec<(Request, Response)> {
        self.entries
            .iter()
            .filter(|(request, _)| matcher.matches(request))
            .cloned()
            .collect()
    }

    pub fn count(&self, matcher: &RequestMatcher) -> usize {
        self.entries
            .iter()
            .filter(|(request, _)| matcher.matches(request))
            .count()
    }

    /// Fail unless exactly `count` logged requests match `matcher`.
    ///
    /// The error lists the logged requests whose URI matched, to help spot
    /// which field was off.
    pub fn assert_request_made(
        &self,
        matcher: &RequestMatcher,
        count: usize,
    ) -> Result<(), AssertionError> {
        let matching = self.count(matcher);
        if matching == count {
            return Ok(());
        }

        let mut lines = vec![
            format!(
                "Matching request found {} times but expected {} times.",
                matching, count
            ),
            format!("Expected request: {}", matcher),
        ];

        let similar: Vec<&Request> = self
            .entries
            .iter()
            .map(|(request, _)| request)
            .filter(|request| matcher.match_uri(request))
            .collect();

        if similar.is_empty() {
            lines.push("No similar requests found.".to_string());
        } else {
            lines.push(format!("Found {} similar request(s):", similar.len()));
            for request in similar {
                lines.push(format_similar(request));
            }
        }

        let mut message = lines.join("\n");
        message.push('\n');
        Err(AssertionError::new(message))
    }
}

fn format_similar(request: &Request) -> String {
    [
        "--- Similar Request Start".to_string(),
        format!("Path: {}", request.path()),
        format!("Method: {}", request.method()),
        format!("Body: {:?}", BytesRepr(request.body())),
        format!("Headers: {}", request.format_headers()),
        format!(
            "Query String: {:?}",
            String::from_utf8_lossy(request.query_string())
        ),
        "--- Similar Request End".to_string(),
    ]
    .join("\n")
}
