pub mod avro;
pub mod config;
pub mod error;
pub mod publish;
pub mod receive;
pub mod subscription;
pub mod topic;
