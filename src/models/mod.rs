mod api_docs;

pub use api_docs::{ApiCatalog, ApiEndpoint, ApiParameter, EndpointLink, SchemaOverride};
