//! Integration tests for the listener: queue items in, parsed operations out.

mod common;

use std::{sync::Arc, time::Duration};

use common::{RecordingWriter, index_item, items, memory_queue};
use pretty_assertions::assert_eq;
use queue::Listener;
use redes_core::{Error, ErrorKind, Operation, Writer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_items_reach_writer_in_order() {
  let (_backend, queue) = memory_queue("listener-order").await;
  let writer = Arc::new(RecordingWriter::default());

  let cancel = CancellationToken::new();
  let (errors_tx, mut errors_rx) = mpsc::channel(8);
  let handle = Listener::run(&cancel, errors_tx, &queue, writer.clone()).unwrap();

  queue
    .write(&[index_item("lr", "1"), index_item("lr", "2"), index_item("lr", "3")])
    .await
    .unwrap();
  writer.wait_for(3).await;
  assert_eq!(writer.ids(), vec!["1", "2", "3"]);

  cancel.cancel();
  handle.await.unwrap();
  queue.close().await;
  assert!(errors_rx.try_recv().is_err());
}

/// One bad item yields one error and the next valid item still goes through
#[tokio::test]
async fn test_malformed_item_is_isolated() {
  let (_backend, queue) = memory_queue("listener-malformed").await;
  let writer = Arc::new(RecordingWriter::default());

  let cancel = CancellationToken::new();
  let (errors_tx, mut errors_rx) = mpsc::channel(8);
  let handle = Listener::run(&cancel, errors_tx, &queue, writer.clone()).unwrap();

  let mut batch = items(&["{not json", r#"{"type":"upsert","upsert":{"index":"lr"}}"#]);
  batch.push(index_item("lr", "ok"));
  queue.write(&batch).await.unwrap();

  writer.wait_for(1).await;
  assert_eq!(writer.ids(), vec!["ok"]);

  let first = errors_rx.recv().await.unwrap();
  assert!(matches!(first, Error::Decode(_)));
  let second = errors_rx.recv().await.unwrap();
  assert!(matches!(second, Error::InvalidOperationType(Some(ref t)) if t == "upsert"));
  assert!(errors_rx.try_recv().is_err());

  cancel.cancel();
  handle.await.unwrap();
  queue.close().await;
}

#[tokio::test]
async fn test_writer_failure_is_reported_and_skipped() {
  let (_backend, queue) = memory_queue("listener-reject").await;
  let writer = Arc::new(RecordingWriter::rejecting(&["2"]));

  let cancel = CancellationToken::new();
  let (errors_tx, mut errors_rx) = mpsc::channel(8);
  let handle = Listener::run(&cancel, errors_tx, &queue, writer.clone()).unwrap();

  queue
    .write(&[index_item("lr", "1"), index_item("lr", "2"), index_item("lr", "3")])
    .await
    .unwrap();
  writer.wait_for(2).await;
  assert_eq!(writer.ids(), vec!["1", "3"]);

  let err = errors_rx.recv().await.unwrap();
  assert_eq!(err.kind(), ErrorKind::Sink);
  assert_eq!(err.to_string(), "Writer: rejected 2");

  cancel.cancel();
  handle.await.unwrap();
  queue.close().await;
}

#[tokio::test]
async fn test_closure_writer() {
  let (_backend, queue) = memory_queue("listener-closure").await;
  let (ops_tx, mut ops_rx) = mpsc::unbounded_channel();
  let writer: Arc<dyn Writer> = Arc::new(move |op: Operation| -> redes_core::Result<()> {
    ops_tx.send(op.to_string()).map_err(|e| Error::Writer(e.to_string()))
  });

  let cancel = CancellationToken::new();
  let (errors_tx, _errors_rx) = mpsc::channel(8);
  let handle = Listener::run(&cancel, errors_tx, &queue, writer).unwrap();

  queue
    .write(&items(&[r#"{"type":"delete","delete":{"index":"lr","id":"9"}}"#]))
    .await
    .unwrap();
  let rendered = tokio::time::timeout(Duration::from_secs(1), ops_rx.recv())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(rendered, r#"{"delete":{"_index":"lr","_id":"9"}}"#);

  cancel.cancel();
  handle.await.unwrap();
  queue.close().await;
}

/// Cancelling ends the listener task
#[tokio::test]
async fn test_cancel_ends_listener() {
  let (_backend, queue) = memory_queue("listener-cancel").await;
  let writer = Arc::new(RecordingWriter::default());

  let cancel = CancellationToken::new();
  let (errors_tx, _errors_rx) = mpsc::channel(8);
  let handle = Listener::run(&cancel, errors_tx, &queue, writer.clone()).unwrap();

  cancel.cancel();
  tokio::time::timeout(Duration::from_secs(1), handle)
    .await
    .expect("listener did not stop")
    .unwrap();
  queue.close().await;

  queue.write(&[index_item("lr", "late")]).await.unwrap();
  tokio::time::sleep(Duration::from_millis(20)).await;
  assert!(writer.ids().is_empty());
  assert_eq!(queue.count_items().await.unwrap(), 1);
}

/// A full error channel nobody drains must not keep the listener alive after cancel
#[tokio::test]
async fn test_cancel_while_error_channel_full() {
  let (_backend, queue) = memory_queue("listener-full-errors").await;
  let writer = Arc::new(RecordingWriter::default());

  let cancel = CancellationToken::new();
  let (errors_tx, _errors_rx) = mpsc::channel(1);
  let handle = Listener::run(&cancel, errors_tx, &queue, writer.clone()).unwrap();

  queue.write(&items(&["bad1", "bad2", "bad3"])).await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;

  cancel.cancel();
  tokio::time::timeout(Duration::from_secs(2), handle)
    .await
    .expect("listener stuck reporting an error")
    .unwrap();
  queue.close().await;
  assert!(writer.ids().is_empty());
}
