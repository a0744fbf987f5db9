use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use tokio::sync::oneshot;

use crate::error::{ProverError, Result};

/// A memoized future every holder can await; all of them observe the same
/// result.
pub type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

/// A shared future settled by hand.
///
/// Used to block keys behind a fetch that has not been issued yet: the
/// [`future`](Self::future) is installed first, the fetch runs, then the
/// handle is resolved or rejected. Dropping the handle unsettled rejects every
/// waiter with [`ProverError::Cancelled`].
pub struct Resolvers<T> {
    sender: oneshot::Sender<Result<T>>,
    future: SharedResult<T>,
}

impl<T: Clone + Send + Sync + 'static> Resolvers<T> {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        let future = async move { receiver.await.unwrap_or(Err(ProverError::Cancelled)) }
            .boxed()
            .shared();
        Self { sender, future }
    }

    pub fn future(&self) -> SharedResult<T> {
        self.future.clone()
    }

    pub fn resolve(self, value: T) {
        // nobody listening is fine
        let _ = self.sender.send(Ok(value));
    }

    pub fn reject(self, err: ProverError) {
        let _ = self.sender.send(Err(err));
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Resolvers<T> {
    fn default() -> Self {
        Self::new()
    }
}
