pub mod job_queries;
