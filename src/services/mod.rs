pub mod background_jobs;
pub mod post_service;
pub mod ranking_service;
pub mod reconcile_service;
pub mod vote_service;
