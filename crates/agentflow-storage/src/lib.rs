// Persistence layer for the workflow engine
//
// PostgreSQL-backed storage behind the core's collaborator traits. The
// repository facade owns the pool; adapters wrap it per trait so the worker
// can be wired against either these or the in-memory implementations.

pub mod adapters;
pub mod models;
pub mod repositories;
pub mod status_sink;

pub use adapters::{
    create_db_document_store, create_db_user_directory, create_db_workflow_store, DbDocumentStore,
    DbUserDirectory, DbWorkflowStore,
};
pub use repositories::Database;
pub use status_sink::{create_db_status_sink, DbStatusSink};
