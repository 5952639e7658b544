//! Bidirectional byte relay between two connections.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::MultiError;

/// Pump bytes `a -> b` and `b -> a` until either direction finishes.
///
/// Whichever direction ends first (EOF or error) ends the relay: both
/// connections are then shut down and dropped. The result carries the error
/// that ended the copy, if any, followed by shutdown failures of `a` and `b`.
/// A connection that is already gone (`NotConnected`) counts as closed.
pub async fn relay<A, B>(a: A, b: B) -> Result<(), MultiError>
where
    A: AsyncRead + AsyncWrite + Unpin + Send,
    B: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let copied = tokio::select! {
        r = tokio::io::copy(&mut a_read, &mut b_write) => r,
        r = tokio::io::copy(&mut b_read, &mut a_write) => r,
    };

    let mut errs = MultiError::new();
    errs.check(copied);

    let mut a = a_read.unsplit(a_write);
    let mut b = b_read.unsplit(b_write);
    errs.check(close(&mut a).await);
    errs.check(close(&mut b).await);
    errs.into_result()
}

async fn close<T>(conn: &mut T) -> io::Result<()>
where
    T: AsyncWrite + Unpin,
{
    match conn.shutdown().await {
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}
