pub mod config;
pub mod convert;
pub mod dag;
pub mod identity;
pub mod index;
pub mod ingest;
pub mod pinecone;
pub mod pipeline;
pub mod storage;
pub mod vector_store;
pub mod vectorize;
