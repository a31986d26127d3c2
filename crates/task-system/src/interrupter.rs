use std::{
	future::{Future, IntoFuture},
	pin::Pin,
	task::{Context, Poll},
	time::Duration,
};

use async_channel as chan;
use futures_concurrency::future::Race;
use thiserror::Error;
use tokio::time::sleep;
use tracing::trace;

/// The error a task body returns when it stops because a cancellation was requested.
///
/// The worker looks for it in the whole error cause chain, so it can be wrapped by task
/// specific errors and still be accounted as a cancellation.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("task execution was interrupted")]
pub struct Interrupted;

pin_project_lite::pin_project! {
	/// Intermediate struct to wait until a cancellation is requested.
	#[must_use = "`InterrupterFuture` does nothing unless polled"]
	pub struct InterrupterFuture<'recv> {
		#[pin]
		fut: chan::Recv<'recv, ()>,
	}
}

impl Future for InterrupterFuture<'_> {
	type Output = Interrupted;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.project();

		match this.fut.poll(cx) {
			// Nobody ever sends on the interruption channel, closing it is the signal
			Poll::Ready(Ok(()) | Err(chan::RecvError)) => {
				trace!("Running task received interruption request");
				Poll::Ready(Interrupted)
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// We use an [`IntoFuture`] implementation to allow the user to use the `await` syntax on the [`Interrupter`] object.
/// With this trait, we return an [`InterrupterFuture`] that will await until a cancellation is requested.
impl<'recv> IntoFuture for &'recv Interrupter {
	type Output = Interrupted;

	type IntoFuture = InterrupterFuture<'recv>;

	fn into_future(self) -> Self::IntoFuture {
		InterrupterFuture {
			fut: self.interrupt_rx.recv(),
		}
	}
}

/// A cancellation token handed to [`Task::run`](crate::Task::run).
///
/// Task bodies check it at safe points (see [`check_interruption!`](crate::check_interruption)),
/// or race their I/O against it with [`Interrupter::run_until_interrupted`]. Bodies that never look
/// at it are still preempted by the worker at their next await point once the cancellation grace
/// period elapses.
#[derive(Debug)]
pub struct Interrupter {
	interrupt_rx: chan::Receiver<()>,
	// Keeps the channel open, only an explicit interruption closes it
	_interrupt_tx: chan::Sender<()>,
}

impl Interrupter {
	#[must_use]
	pub fn new() -> (Self, InterruptHandle) {
		let (interrupt_tx, interrupt_rx) = chan::bounded(1);

		(
			Self {
				interrupt_rx,
				_interrupt_tx: interrupt_tx.clone(),
			},
			InterruptHandle { interrupt_tx },
		)
	}

	/// Check if a cancellation was requested in a non-blocking manner.
	#[must_use]
	pub fn is_interrupted(&self) -> bool {
		self.interrupt_rx.is_closed()
	}

	/// Same as [`Interrupter::is_interrupted`] but suited to be used with the `?` operator.
	pub fn check(&self) -> Result<(), Interrupted> {
		if self.is_interrupted() {
			Err(Interrupted)
		} else {
			Ok(())
		}
	}

	/// Drives `fut` to completion unless a cancellation is requested first.
	pub async fn run_until_interrupted<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
		(
			async { Ok::<_, Interrupted>(fut.await) },
			async { Err::<F::Output, _>(self.into_future().await) },
		)
			.race()
			.await
	}

	/// An interruptible sleep.
	pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
		self.run_until_interrupted(sleep(duration)).await
	}
}

/// The worker side of an [`Interrupter`].
#[derive(Debug, Clone)]
pub struct InterruptHandle {
	interrupt_tx: chan::Sender<()>,
}

impl InterruptHandle {
	/// Requests the cancellation, idempotent.
	pub fn interrupt(&self) {
		if self.interrupt_tx.close() {
			trace!("Sent interruption signal to Interrupter object on task");
		}
	}

	#[must_use]
	pub fn is_interrupted(&self) -> bool {
		self.interrupt_tx.is_closed()
	}
}

#[macro_export]
macro_rules! check_interruption {
	($interrupter:ident) => {
		let interrupter: &$crate::Interrupter = $interrupter;

		if interrupter.is_interrupted() {
			::tracing::trace!("Task was canceled by the user");
			return Err($crate::Interrupted.into());
		}
	};
}
