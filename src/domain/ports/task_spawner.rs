use futures::future::BoxFuture;

/// Runs background futures (the worker pool) on whatever runtime hosts the crate
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, future: BoxFuture<'static, ()>);
}
