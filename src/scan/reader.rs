//! Measurement Reader: one acquisition query, one scalar back.

use crate::error::{AppResult, ScanError};
use crate::instrument::{scpi, InstrumentPort};
use crate::measurement::{ChannelAddress, MeasurementKind};

/// Issues the `MEASure` query for a (channel, kind) pair and returns the first value.
///
/// Extra samples in a batched reply are discarded. The reader never retries; that is the
/// sequencer's decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasurementReader;

impl MeasurementReader {
    /// Read `kind` on `channel`.
    pub async fn read<P>(
        &self,
        port: &mut P,
        channel: &ChannelAddress,
        kind: MeasurementKind,
    ) -> AppResult<f64>
    where
        P: InstrumentPort + ?Sized,
    {
        let values = port.query(&scpi::measure(kind, channel)).await?;
        match values.split_first() {
            Some((first, rest)) => {
                if !rest.is_empty() {
                    tracing::debug!(%channel, %kind, discarded = rest.len(), "Discarding extra samples");
                }
                Ok(*first)
            }
            None => Err(ScanError::Protocol(format!(
                "No value in reply to {} query on {}",
                kind, channel
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{FailureMode, MockInstrument};
    use async_trait::async_trait;

    async fn configured(kind: MeasurementKind, value: f64) -> MockInstrument {
        let mut dmm = MockInstrument::new().with_value(kind, value);
        let channel = ChannelAddress::parse("@1001").unwrap();
        dmm.send(&scpi::configure(kind, &channel, &Default::default()))
            .await
            .unwrap();
        dmm
    }

    #[tokio::test]
    async fn returns_first_value() {
        let mut dmm = configured(MeasurementKind::Voltage, 12.5)
            .await
            .with_extra_samples(3);
        let channel = ChannelAddress::parse("@1001").unwrap();
        let value = MeasurementReader
            .read(&mut dmm, &channel, MeasurementKind::Voltage)
            .await
            .unwrap();
        assert_eq!(value, 12.5);
        assert_eq!(
            dmm.call_log().last().unwrap(),
            ":MEASure:SCALar:VOLTage:DC? (@1001)"
        );
    }

    #[tokio::test]
    async fn transport_failures_propagate_without_retry() {
        let mut dmm = configured(MeasurementKind::Current, 0.003).await;
        dmm.fail_times("@1001", MeasurementKind::Current, FailureMode::Transport, 1);
        let channel = ChannelAddress::parse("@1001").unwrap();
        let before = dmm.call_log().len();

        let err = MeasurementReader
            .read(&mut dmm, &channel, MeasurementKind::Current)
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::Transport(_)));
        assert_eq!(dmm.call_log().len(), before + 1);
    }

    #[tokio::test]
    async fn garbage_reply_is_protocol_error() {
        let mut dmm = configured(MeasurementKind::Resistance, 1.0).await;
        dmm.fail_on(
            "@1001",
            MeasurementKind::Resistance,
            FailureMode::Garbage("-113,\"Undefined header\"".into()),
        );
        let channel = ChannelAddress::parse("@1001").unwrap();
        let err = MeasurementReader
            .read(&mut dmm, &channel, MeasurementKind::Resistance)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Protocol(_)));
    }

    struct EmptyPort;

    #[async_trait]
    impl InstrumentPort for EmptyPort {
        async fn send(&mut self, _command: &str) -> AppResult<()> {
            Ok(())
        }

        async fn query(&mut self, _command: &str) -> AppResult<Vec<f64>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn empty_value_list_is_protocol_error() {
        let channel = ChannelAddress::parse("@1001").unwrap();
        let err = MeasurementReader
            .read(&mut EmptyPort, &channel, MeasurementKind::Voltage)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Protocol(_)));
    }
}
