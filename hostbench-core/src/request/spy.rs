use hostbench_runtime::{
    HostRuntime, RenderOutcome, RestRequest, RestResponse, RestServer,
};
use parking_lot::Mutex;

/// REST server that records the routed response instead of emitting it.
#[derive(Debug, Default)]
pub struct SpyServer {
    last: Mutex<Option<RestResponse>>,
}

impl SpyServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded response, leaving the spy empty.
    pub fn take(&self) -> Option<RestResponse> {
        self.last.lock().take()
    }
}

impl RestServer for SpyServer {
    fn serve_request(
        &self,
        runtime: &HostRuntime,
        request: &RestRequest,
        _sink: &mut Vec<u8>,
    ) -> RenderOutcome {
        let response = runtime.rest_dispatch(request);
        *self.last.lock() = Some(response);
        RenderOutcome::Halted
    }
}
