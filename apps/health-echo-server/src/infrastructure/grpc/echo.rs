//! Echo gRPC Adapter
//!
//! Implements `grpc.examples.echo.Echo` on top of [`EchoService`].

use tonic::{Request, Response, Status};

use super::proto::grpc::examples::echo::{EchoRequest, EchoResponse, echo_server::Echo};
use crate::application::services::EchoService;

/// gRPC adapter for the echo service.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoGrpcService {
    service: EchoService,
}

impl EchoGrpcService {
    /// Create a new adapter.
    #[must_use]
    pub const fn new(service: EchoService) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl Echo for EchoGrpcService {
    async fn unary_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<EchoResponse>, Status> {
        let message = self.service.echo(request.into_inner().message);
        Ok(Response::new(EchoResponse { message }))
    }
}
