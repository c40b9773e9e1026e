//! Channel Configurator: puts one channel into the right function before it is read.

use crate::error::AppResult;
use crate::instrument::{scpi, InstrumentPort};
use crate::measurement::{AcquisitionSettings, ChannelAddress, MeasurementKind};

/// Issues the full configuration sequence for a (channel, kind) pair.
///
/// Order on the wire:
/// 1. `CONFigure` with function, range and resolution (resets the active function),
/// 2. integration cycles,
/// 3. offset compensation.
///
/// Steps 2 and 3 are only accepted once the function is selected. Nothing is assumed about
/// what the instrument held before: the sequence is sent in full every time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelConfigurator;

impl ChannelConfigurator {
    /// Configure `channel` for `kind` with `settings`.
    pub async fn configure<P>(
        &self,
        port: &mut P,
        channel: &ChannelAddress,
        kind: MeasurementKind,
        settings: &AcquisitionSettings,
    ) -> AppResult<()>
    where
        P: InstrumentPort + ?Sized,
    {
        tracing::debug!(%channel, %kind, ?settings, "Configuring channel");
        port.send(&scpi::configure(kind, channel, settings)).await?;
        port.send(&scpi::integration_cycles(
            kind,
            channel,
            settings.integration_cycles,
        ))
        .await?;
        port.send(&scpi::offset_compensation(
            kind,
            channel,
            settings.offset_compensation,
        ))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::MockInstrument;

    #[tokio::test]
    async fn issues_configure_then_secondary_settings() {
        let mut dmm = MockInstrument::new();
        let channel = ChannelAddress::parse("@1005").unwrap();
        let settings = AcquisitionSettings {
            range: 10.0,
            resolution_digits: 5.5,
            integration_cycles: 1.0,
            offset_compensation: false,
        };

        ChannelConfigurator
            .configure(&mut dmm, &channel, MeasurementKind::Current, &settings)
            .await
            .unwrap();

        assert_eq!(
            dmm.call_log(),
            &[
                ":CONFigure:SCALar:CURRent:DC 10,5.5,(@1005)".to_string(),
                ":SENSe:CURRent:DC:NPLCycles 1,(@1005)".to_string(),
                ":SENSe:CURRent:OCOMpensated 0,(@1005)".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn repeated_configuration_sends_identical_sequences() {
        let mut dmm = MockInstrument::new();
        let channel = ChannelAddress::parse("@1001").unwrap();
        let settings = AcquisitionSettings::default();
        let configurator = ChannelConfigurator;

        configurator
            .configure(&mut dmm, &channel, MeasurementKind::Resistance, &settings)
            .await
            .unwrap();
        let first = dmm.call_log().to_vec();
        dmm.clear_call_log();
        configurator
            .configure(&mut dmm, &channel, MeasurementKind::Resistance, &settings)
            .await
            .unwrap();

        assert_eq!(first, dmm.call_log());
    }
}
