//! Upstream provider collaborators
//!
//! Thin transport layers for the two providers. The proxy core consumes
//! these through narrow seams (a byte/line stream for Azure, an event
//! stream and a response struct for Bedrock) and never reimplements
//! vendor protocol logic beyond them.

pub mod azure;
pub mod bedrock;
pub mod eventstream;
pub mod sts;

pub use azure::AzureClient;
pub use bedrock::{
    operation_to_method, resolve_operation, BedrockResponse, BedrockRuntime, Operation, Service,
    SigV4BedrockClient,
};
pub use sts::StsAssumeRole;
