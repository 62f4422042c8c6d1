//! Decode stage sitting between `message_extractor` and `merger`: turns each
//! `RawBatch` into a `DecodedBatch` by round-tripping through the
//! `CodecBroker`, preserving progress/tick framing untouched (spec §4.5).

use crate::{codec::CodecBroker, codec::CodecTransport, model::MessageFlowItem};
use std::sync::Arc;
use tokio::sync::mpsc;

pub fn spawn<T: CodecTransport + 'static>(
    broker: Arc<CodecBroker<T>>,
    mut input: mpsc::Receiver<MessageFlowItem>,
    buffer: usize,
) -> mpsc::Receiver<MessageFlowItem> {
    let (tx, rx) = mpsc::channel(buffer);
    tokio::spawn(async move {
        while let Some(item) = input.recv().await {
            let out = match item {
                MessageFlowItem::RawBatch { progress, batch } => {
                    let stream_name = progress.stream.name.clone();
                    let messages = batch.messages().cloned().collect::<Vec<_>>();
                    let decoded = broker.submit(stream_name, messages).await;
                    MessageFlowItem::DecodedBatch { progress, decoded }
                }
                other => other,
            };
            if tx.send(out).await.is_err() {
                return;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SearchConfig,
        error::Result,
        metrics::NoopMetrics,
        model::{MessageBatch, MessageId, RawMessage, StreamDirection, StreamKey, StreamProgress},
    };
    use async_trait::async_trait;
    use chrono::Utc;

    struct LoopbackTransport {
        broker: parking_lot::Mutex<Option<Arc<CodecBroker<LoopbackTransport>>>>,
    }

    #[async_trait]
    impl CodecTransport for LoopbackTransport {
        async fn send(&self, request: crate::codec::CodecRequest) -> Result<()> {
            let broker = self.broker.lock().clone().unwrap();
            let messages = request
                .messages
                .iter()
                .map(|m| crate::model::DecodedMessage {
                    id: m.id.clone(),
                    message_type: Some("decoded".into()),
                    body: None,
                    diagnostic: None,
                })
                .collect();
            tokio::spawn(async move {
                broker
                    .complete(crate::codec::CodecResponse {
                        request_id: request.request_id,
                        messages,
                    })
                    .await;
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn decodes_raw_batch_into_decoded_batch() {
        let transport = Arc::new(LoopbackTransport {
            broker: parking_lot::Mutex::new(None),
        });
        let broker = Arc::new(CodecBroker::new(transport.clone(), &SearchConfig::default(), Arc::new(NoopMetrics)));
        *transport.broker.lock() = Some(broker.clone());

        let (tx, rx) = mpsc::channel(4);
        let stream = StreamKey::new("s", StreamDirection::First);
        let message = RawMessage {
            id: MessageId {
                stream: stream.clone(),
                sequence: 1,
                timestamp: Utc::now(),
            },
            body: vec![1],
        };
        let batch = MessageBatch::new(stream.clone(), vec![message.clone()]);
        tx.send(MessageFlowItem::RawBatch {
            progress: StreamProgress {
                stream: stream.clone(),
                stream_empty: true,
                last_processed_id: Some(message.id.clone()),
                last_scanned_time: message.id.timestamp,
            },
            batch: Arc::new(batch),
        })
        .await
        .unwrap();
        drop(tx);

        let mut out = spawn(broker, rx, 4);
        match out.recv().await.unwrap() {
            MessageFlowItem::DecodedBatch { decoded, .. } => {
                assert_eq!(decoded.len(), 1);
                assert_eq!(decoded[0].message_type.as_deref(), Some("decoded"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
