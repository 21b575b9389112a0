//! gRPC services exposed to light wallets and to the darkside test driver.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

pub mod darkside;
pub mod streamer;

pub use darkside::DarksideStreamerService;
pub use streamer::LightwalletdStreamer;

const STREAM_BUFFER: usize = 32;
const TRANSPARENT_ADDRESS_LEN: usize = 35;

/// Response stream fed by a spawned producer.
pub type ResponseStream<T> = ReceiverStream<Result<T, Status>>;

/// Rejects anything but a `t`-prefixed, 35 character alphanumeric address.
pub fn check_taddress(address: &str) -> Result<(), Status> {
    let valid = address.len() == TRANSPARENT_ADDRESS_LEN
        && address.starts_with('t')
        && address.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(Status::invalid_argument(format!(
            "invalid transparent address: {address}"
        )))
    }
}

/// Runs `produce` on its own task, feeding the returned stream. With a
/// `limit`, a producer still running when it expires is cancelled and the
/// stream ends with `DeadlineExceeded`.
fn spawn_stream<T, F, Fut>(limit: Option<Duration>, produce: F) -> ResponseStream<T>
where
    T: Send + 'static,
    F: FnOnce(mpsc::Sender<Result<T, Status>>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
    let producer = produce(sender.clone());
    tokio::spawn(async move {
        match limit {
            Some(limit) => {
                if tokio::time::timeout(limit, producer).await.is_err() {
                    let _ = sender
                        .send(Err(Status::deadline_exceeded(format!(
                            "stream not completed within {limit:?}"
                        ))))
                        .await;
                }
            }
            None => producer.await,
        }
    });
    ReceiverStream::new(receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn transparent_addresses() {
        check_taddress("t1Zmr6YMH2gTH4pDuWc3NL6bqqKF9zXpyPa").unwrap();
        check_taddress("tmBsTi2xWTjUdEXnuTceL7fecEQKeWaPDJd").unwrap();
        for bad in [
            "",
            "u1Zmr6YMH2gTH4pDuWc3NL6bqqKF9zXpyPa",
            "t1Zmr6YMH2gTH4pDuWc3NL6bqqKF9zXpyP",
            "t1Zmr6YMH2gTH4pDuWc3NL6bqqKF9zXpyPaa",
            "t1Zmr6YMH2gTH4pDuWc3NL6bqqKF9zXpy-a",
        ] {
            assert_eq!(
                check_taddress(bad).unwrap_err().code(),
                tonic::Code::InvalidArgument
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_producer_hits_deadline() {
        let stream = spawn_stream(Some(Duration::from_secs(30)), |sender| async move {
            let _ = sender.send(Ok(1u32)).await;
            tokio::time::sleep(Duration::from_secs(60)).await;
            let _ = sender.send(Ok(2u32)).await;
        });
        let items: Vec<Result<u32, Status>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(*items[0].as_ref().unwrap(), 1);
        assert_eq!(
            items[1].as_ref().unwrap_err().code(),
            tonic::Code::DeadlineExceeded
        );
    }
}
