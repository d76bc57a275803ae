use super::request::parse_request;
use super::response::{write_handler_response, HeaderLines};
use crate::app::Application;
use may_minihttp::{HttpService, Request, Response};
use std::io;
use std::sync::Arc;
use tracing::debug;

/// `may_minihttp` service driving an [`Application`].
///
/// Cloned once per connection; all clones share the same application. Each clone owns the
/// header lines of the response it is currently writing.
pub struct AppService {
    pub app: Arc<Application>,
    lines: HeaderLines,
}

impl AppService {
    #[must_use]
    pub fn new(app: Arc<Application>) -> Self {
        Self {
            app,
            lines: HeaderLines::default(),
        }
    }
}

impl Clone for AppService {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.app))
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        // The previous response on this connection has been encoded by now.
        self.lines.reset();

        let method = req.method().to_string();
        let target = req.path().to_string();

        let response = match parse_request(req, self.app.config().max_body_bytes) {
            Ok(request) => self.app.handle(request),
            Err(err) => {
                debug!(method = %method, target = %target, status = err.status, "Request rejected by transport");
                self.app.handle_transport_error(&err, &method, &target)
            }
        };
        write_handler_response(res, &response, &mut self.lines);
        Ok(())
    }
}
