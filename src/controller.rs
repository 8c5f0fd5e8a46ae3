use crate::{
    ble::{BleManager, BleTransport},
    dispatcher::{CommandDispatcher, DispatchState, Transport},
    error::{KspadError, Result},
    events::EventSink,
    polling::PollingScheduler,
    protocol::{encode_command, CommandFrame, Opcode},
    telemetry::TelemetryProcessor,
    translator::{translator_for, ModelTranslator},
    types::{BeltMode, ConnectionParams, ControllerConfig, DeviceInfo, TreadmillStats},
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

/// What the link layer knows about the connected peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    /// Advertised model name, used for translator lookup
    pub model_name: String,
}

impl ConnectionContext {
    /// Create a context for `model_name`
    #[must_use]
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
        }
    }
}

/// Main interface for driving one treadmill
///
/// `TreadmillController` ties the protocol pieces together: commands are
/// encoded and pushed through a rate-limited dispatcher, notifications are
/// decoded into [`TreadmillStats`] snapshots, and state changes are reported
/// to an [`EventSink`] as [`crate::TreadmillEvent`]s.
///
/// None of the command methods wait for the device. They validate their
/// argument, enqueue a frame and return; transmission happens in the
/// background with at least [`ControllerConfig::min_command_interval`]
/// between writes.
///
/// # Degraded mode
///
/// If the connected model has no registered speed translator the
/// controller still works, but speed commands other than stop are refused
/// with [`KspadError::UnknownModel`] and snapshots carry only the raw speed.
///
/// # Examples
///
/// ```no_run
/// use kspad::{event_channel, TreadmillController, TreadmillEvent};
/// use std::{sync::Arc, time::Duration};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (tx, mut events) = event_channel();
///     let treadmill = TreadmillController::connect_first(Arc::new(tx)).await?;
///
///     treadmill.start_belt()?;
///     treadmill.set_speed(2.0)?;
///     treadmill.start_polling(Duration::from_secs(1))?;
///
///     while let Some(event) = events.recv().await {
///         if let TreadmillEvent::SpeedChanged(stats) = event {
///             println!("speed: {:?}", stats.belt_speed);
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct TreadmillController {
    context: ConnectionContext,
    translator: Option<ModelTranslator>,
    dispatcher: Arc<CommandDispatcher>,
    telemetry: TelemetryProcessor,
    poller: PollingScheduler,
    config: ControllerConfig,
    link: Option<Arc<BleTransport>>,
}

impl TreadmillController {
    /// Create a controller over an arbitrary transport
    ///
    /// The translator is looked up once here and kept for the session.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        context: ConnectionContext,
        sink: Arc<dyn EventSink>,
        config: ControllerConfig,
    ) -> Self {
        let translator = translator_for(&context.model_name);
        match translator {
            Some(t) => info!("Model {} uses {} speed units", context.model_name, t),
            None => warn!(
                "No speed translator for model {}: speed commands disabled",
                context.model_name
            ),
        }

        let dispatcher = Arc::new(CommandDispatcher::new(
            transport,
            Arc::clone(&sink),
            config.min_command_interval,
        ));

        Self {
            context,
            translator,
            telemetry: TelemetryProcessor::new(translator, sink),
            poller: PollingScheduler::new(Arc::clone(&dispatcher)),
            dispatcher,
            config,
            link: None,
        }
    }

    /// Scan for the first supported treadmill and connect with default settings
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::DeviceNotFound`] if no supported treadmill is found
    /// during the scan, or any BLE connection error.
    pub async fn connect_first(sink: Arc<dyn EventSink>) -> Result<Arc<Self>> {
        Self::connect_with(ConnectionParams::default(), ControllerConfig::default(), sink).await
    }

    /// Scan and connect to the strongest matching treadmill
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::DeviceNotFound`] if no matching treadmill is found
    /// during the scan, or any BLE connection error.
    pub async fn connect_with(
        params: ConnectionParams,
        config: ControllerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>> {
        let ble_manager = BleManager::new().await?;
        let mut devices = ble_manager.scan_for_devices(&params).await?;

        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        let device_info = devices.into_iter().next().ok_or(KspadError::DeviceNotFound)?;

        Self::attach(&ble_manager, &device_info, &params, config, sink).await
    }

    /// Connect to a specific treadmill found by a previous scan
    ///
    /// # Errors
    ///
    /// Returns any BLE connection error.
    pub async fn connect_to_device(
        device_info: DeviceInfo,
        params: ConnectionParams,
        config: ControllerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>> {
        let ble_manager = BleManager::new().await?;
        ble_manager.scan_for_devices(&params).await?;
        Self::attach(&ble_manager, &device_info, &params, config, sink).await
    }

    async fn attach(
        ble_manager: &BleManager,
        device_info: &DeviceInfo,
        params: &ConnectionParams,
        config: ControllerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>> {
        let link = Arc::new(ble_manager.connect_to_device(device_info, params).await?);
        let context = ConnectionContext::new(link.model_name());

        let mut controller = Self::new(link.clone(), context, sink, config);
        controller.link = Some(Arc::clone(&link));
        let controller = Arc::new(controller);

        let _forwarder = link
            .forward_notifications(Arc::downgrade(&controller))
            .await?;

        Ok(controller)
    }

    /// Start the belt
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::NotReady`] if no Tokio runtime can send the command.
    pub fn start_belt(&self) -> Result<()> {
        info!("Starting belt");
        self.dispatcher.enqueue(CommandFrame::start_belt())
    }

    /// Stop the belt
    ///
    /// Allowed in degraded mode.
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::NotReady`] if no Tokio runtime can send the command.
    pub fn stop_belt(&self) -> Result<()> {
        info!("Stopping belt");
        self.dispatcher.enqueue(CommandFrame::stop_belt())
    }

    /// Set the belt speed in the translator's physical unit
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::UnknownModel`] if the model has no translator, or
    /// [`KspadError::InvalidArgument`] if the speed is negative, not finite or
    /// beyond what one raw byte can express. Returns [`KspadError::NotReady`]
    /// if no Tokio runtime can send the command.
    pub fn set_speed(&self, speed: f64) -> Result<()> {
        let translator = self.require_translator()?;
        let raw = translator.to_raw(speed)?;

        info!("Setting speed to {:.2} {} (raw {})", speed, translator.unit(), raw);
        self.dispatcher.enqueue(CommandFrame::set_speed(raw))
    }

    /// Set the belt speed in raw device units
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::InvalidArgument`] if `raw` does not fit in one
    /// byte, or [`KspadError::UnknownModel`] for a non-zero speed on an
    /// unknown model, or [`KspadError::NotReady`] without a Tokio runtime.
    pub fn set_raw_speed(&self, raw: u32) -> Result<()> {
        let frame = encode_command(Opcode::SetSpeed, raw)?;
        if raw != 0 {
            self.require_translator()?;
        }

        info!("Setting raw speed to {}", raw);
        self.dispatcher.enqueue(frame)
    }

    /// Switch the belt mode
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::InvalidArgument`] for [`BeltMode::Auto`], or
    /// [`KspadError::NotReady`] without a Tokio runtime.
    pub fn set_mode(&self, mode: BeltMode) -> Result<()> {
        let frame = CommandFrame::set_mode(mode)?;
        info!("Setting mode {}", mode);
        self.dispatcher.enqueue(frame)
    }

    /// Switch to manual mode
    ///
    /// # Errors
    ///
    /// See [`Self::set_mode`].
    pub fn select_manual_mode(&self) -> Result<()> {
        self.set_mode(BeltMode::Manual)
    }

    /// Switch to standby mode
    ///
    /// # Errors
    ///
    /// See [`Self::set_mode`].
    pub fn select_standby_mode(&self) -> Result<()> {
        self.set_mode(BeltMode::Standby)
    }

    /// Ask the device for one telemetry frame
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::NotReady`] if no Tokio runtime can send the command.
    pub fn request_stats(&self) -> Result<()> {
        self.dispatcher.enqueue(CommandFrame::request_stats())
    }

    /// Request stats now and then every `interval`; zero polls once
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::NotReady`] if no Tokio runtime can run the schedule.
    pub fn start_polling(&self, interval: Duration) -> Result<()> {
        self.poller.start_polling(interval)
    }

    /// Start polling at [`ControllerConfig::poll_interval`]
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::NotReady`] if no Tokio runtime can run the schedule.
    pub fn start_default_polling(&self) -> Result<()> {
        self.poller.start_polling(self.config.poll_interval)
    }

    /// Stop polling at the next tick
    pub fn stop_polling(&self) {
        self.poller.stop_polling();
    }

    /// True while a repeating poll schedule is active
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller.is_polling()
    }

    /// Entry point for bytes received on the stats channel
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::MalformedFrame`] if the frame cannot be decoded;
    /// the failure is also emitted as an event.
    pub fn on_telemetry(&self, raw: &[u8]) -> Result<TreadmillStats> {
        self.telemetry.on_telemetry(raw)
    }

    /// Most recent valid snapshot
    #[must_use]
    pub fn last_stats(&self) -> Option<TreadmillStats> {
        self.telemetry.last_stats()
    }

    /// Active speed translator, `None` in degraded mode
    #[must_use]
    pub const fn translator(&self) -> Option<ModelTranslator> {
        self.translator
    }

    /// True when the model has no speed translator
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.translator.is_none()
    }

    /// Advertised model name of the connected peripheral
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.context.model_name
    }

    /// Controller configuration
    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Drain state of the command queue
    #[must_use]
    pub fn dispatch_state(&self) -> DispatchState {
        self.dispatcher.state()
    }

    /// Number of commands waiting to be sent
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.dispatcher.pending()
    }

    /// Check if the BLE link is up; always false for custom transports
    pub async fn is_connected(&self) -> bool {
        match &self.link {
            Some(link) => link.is_connected().await,
            None => false,
        }
    }

    /// Stop polling and close the BLE link, if any
    ///
    /// Commands still queued are dropped as not ready once the link is down.
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::Ble`] if disconnection fails.
    pub async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from device");
        self.poller.stop_polling();

        if let Some(link) = &self.link {
            link.disconnect().await?;
        }

        Ok(())
    }

    fn require_translator(&self) -> Result<ModelTranslator> {
        self.translator.ok_or_else(|| {
            error!(
                "Refusing speed command: no translator for {}",
                self.context.model_name
            );
            KspadError::UnknownModel {
                model: self.context.model_name.clone(),
            }
        })
    }
}

impl Drop for TreadmillController {
    fn drop(&mut self) {
        self.poller.stop_polling();

        let Some(link) = self.link.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = link.disconnect().await;
            });
        }
    }
}
