pub mod member_directory;
pub mod notification_sink;
pub mod plan_repository;
pub mod sla_repository;
pub mod subscription_repository;
pub mod task_queue;
pub mod task_spawner;
pub mod ticket_repository;
pub mod time_service;
pub mod usage_repository;
