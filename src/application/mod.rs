pub mod batch_dispatcher;
pub mod job_service;
