//! Service discovery over `grpc.reflection.v1`.
//!
//! The console learns what the gateway serves the same way any external
//! client would: by asking the reflection service on the shared port.

use futures_util::stream;
use prost::Message;
use prost_types::FileDescriptorProto;
use tonic::transport::Channel;
use tonic::{Code, Status};
use tonic_reflection::pb::v1::server_reflection_client::ServerReflectionClient;
use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;
use tonic_reflection::pb::v1::ServerReflectionRequest;

use super::ConsoleError;

/// One RPC method as described by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedMethod {
    pub service: String,
    pub name: String,
    pub input_type: String,
    pub output_type: String,
}

impl ReflectedMethod {
    /// Request path, `/{service}/{method}`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Reflector {
    client: ServerReflectionClient<Channel>,
}

impl Reflector {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: ServerReflectionClient::new(channel),
        }
    }

    /// Fully-qualified names of every service the server exposes.
    pub async fn services(&mut self) -> Result<Vec<String>, ConsoleError> {
        match self.ask(MessageRequest::ListServices(String::new())).await? {
            MessageResponse::ListServicesResponse(list) => {
                Ok(list.service.into_iter().map(|service| service.name).collect())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Methods of `service`, in declaration order.
    pub async fn methods(&mut self, service: &str) -> Result<Vec<ReflectedMethod>, ConsoleError> {
        let files = match self
            .ask(MessageRequest::FileContainingSymbol(service.to_string()))
            .await?
        {
            MessageResponse::FileDescriptorResponse(response) => response.file_descriptor_proto,
            other => return Err(unexpected(&other)),
        };

        let mut methods = Vec::new();
        for encoded in files {
            let file = FileDescriptorProto::decode(encoded.as_slice())
                .map_err(|e| ConsoleError::Reflection(format!("undecodable file descriptor: {e}")))?;
            methods.extend(service_methods(&file, service));
        }
        Ok(methods)
    }

    async fn ask(&mut self, request: MessageRequest) -> Result<MessageResponse, ConsoleError> {
        let request = ServerReflectionRequest {
            host: String::new(),
            message_request: Some(request),
        };
        let mut responses = self
            .client
            .server_reflection_info(stream::iter([request]))
            .await?
            .into_inner();

        let response = responses
            .message()
            .await?
            .and_then(|response| response.message_response)
            .ok_or_else(|| ConsoleError::Reflection("empty reflection response".to_string()))?;

        match response {
            MessageResponse::ErrorResponse(error) => Err(ConsoleError::Rpc(Status::new(
                Code::from(error.error_code),
                error.error_message,
            ))),
            other => Ok(other),
        }
    }
}

fn unexpected(response: &MessageResponse) -> ConsoleError {
    ConsoleError::Reflection(format!("unexpected reflection response: {response:?}"))
}

/// Methods declared by `service` in `file`, with type names stripped of the
/// leading dot.
fn service_methods(file: &FileDescriptorProto, service: &str) -> Vec<ReflectedMethod> {
    let package = file.package();
    file.service
        .iter()
        .filter(|descriptor| qualify(package, descriptor.name()) == service)
        .flat_map(|descriptor| &descriptor.method)
        .map(|method| ReflectedMethod {
            service: service.to_string(),
            name: method.name().to_string(),
            input_type: method.input_type().trim_start_matches('.').to_string(),
            output_type: method.output_type().trim_start_matches('.').to_string(),
        })
        .collect()
}

fn qualify(package: &str, name: &str) -> String {
    if package.is_empty() {
        name.to_string()
    } else {
        format!("{package}.{name}")
    }
}
