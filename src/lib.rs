pub mod correlate;
pub mod error;
pub mod history;
pub mod logging;
pub mod message;
pub mod outputs;
pub mod path;
pub mod protocol;
pub mod remote;
pub mod resolve;
pub mod schema;
pub mod settings;
pub mod template;

pub use error::{ErrorKind, MessageError, Result};
pub use history::{ExecutionHistory, NoExecutionHistory, RecordedHistory};
pub use message::MessageAdapter;
pub use protocol::{dispatch, single_command, CallEnvelope, Operation, StreamSession};
pub use remote::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use schema::{FsSchemaValidator, NoSchemas, SchemaKind, SchemaValidator};
pub use settings::Settings;
