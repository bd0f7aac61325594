pub mod config;
pub mod driver;
pub mod endpoint;
pub mod intake;
pub mod model;
pub mod server;
pub mod transport;

pub use config::{Environment, ServerConfig};
pub use driver::SessionDriver;
pub use endpoint::{EndpointError, EndpointResponse, ErrorKind, ProcessingEndpoint};
pub use model::{GeminiImageModel, ImageModel, InlineImage, ModelError};
pub use server::{ProcessingServer, ShutdownHandle};
pub use transport::{DirectClient, EndpointClient, ImageProcessor, ProcessFailure};
