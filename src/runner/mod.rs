use crate::config::{FixtureConfig, SenderConfig};
use crate::delivery::{BatchReport, BrokerClient, DeliveryPipeline};
use crate::error::SenderError;
use crate::event::source_message_id;
use crate::nats::{EventPublisher, NatsClient};
use crate::source::{load_optional_records, load_records, MailRecord, SourceRecord, WhatsappRecord};
use std::path::PathBuf;
use tracing::info;


/// Which fixtures a run reads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// `mail.json` and `whatsapp.json`, both required
    Primary,
    /// Fault-injection fixtures, each optional
    Malformed,
}

/// One channel's fixture within a source set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fixture {
    pub path: PathBuf,
    /// Prefix of generated source message ids
    pub id_prefix: &'static str,
    /// A missing required fixture ends the run; a missing optional one is an empty batch
    pub required: bool,
}

/// Fixtures for both channels, selected by run mode
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSet {
    pub mail: Fixture,
    pub whatsapp: Fixture,
}

impl SourceSet {
    pub fn for_mode(mode: RunMode, fixtures: &FixtureConfig) -> Self {
        match mode {
            RunMode::Primary => Self {
                mail: Fixture {
                    path: fixtures.path(&fixtures.mail),
                    id_prefix: "mail",
                    required: true,
                },
                whatsapp: Fixture {
                    path: fixtures.path(&fixtures.whatsapp),
                    id_prefix: "wa",
                    required: true,
                },
            },
            RunMode::Malformed => Self {
                mail: Fixture {
                    path: fixtures.path(&fixtures.malformed_mail),
                    id_prefix: "malformed-mail",
                    required: false,
                },
                whatsapp: Fixture {
                    path: fixtures.path(&fixtures.malformed_whatsapp),
                    id_prefix: "malformed-wa",
                    required: false,
                },
            },
        }
    }
}

/// Reports of one run, per channel
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub mail: BatchReport,
    pub whatsapp: BatchReport,
}

impl RunSummary {
    pub fn successful(&self) -> usize {
        self.mail.successful() + self.whatsapp.successful()
    }

    pub fn failed(&self) -> usize {
        self.mail.failed() + self.whatsapp.failed()
    }
}

/// Connect to NATS, send both batches for `mode`, then close the connection.
///
/// The connection is closed on every path once it has been opened,
/// including when a batch ends the run with an error. If this future is
/// dropped mid-run, dropping the client and publisher closes it instead.
pub async fn run(config: &SenderConfig, mode: RunMode) -> Result<RunSummary, SenderError> {
    let client = NatsClient::connect(config.nats.clone(), config.topics.all()).await?;
    let publisher = EventPublisher::new(client.jetstream().clone(), config.delivery.ack_timeout());

    let result = run_with_broker(config, mode, &publisher).await;

    // The publisher holds a connection handle of its own
    drop(publisher);
    client.close().await;
    result
}

/// Send the mail batch, then the WhatsApp batch, over `broker`
pub async fn run_with_broker<B: BrokerClient + ?Sized>(
    config: &SenderConfig,
    mode: RunMode,
    broker: &B,
) -> Result<RunSummary, SenderError> {
    let sources = SourceSet::for_mode(mode, &config.fixtures);
    let pipeline = DeliveryPipeline::new(broker, config.delivery.clone());

    info!(
        mode = ?mode,
        mail_topic = %config.topics.mail,
        whatsapp_topic = %config.topics.whatsapp,
        "Starting run"
    );

    let mail = send_fixture::<MailRecord, B>(&pipeline, &config.topics.mail, &sources.mail).await?;
    let whatsapp =
        send_fixture::<WhatsappRecord, B>(&pipeline, &config.topics.whatsapp, &sources.whatsapp)
            .await?;

    Ok(RunSummary { mail, whatsapp })
}

async fn send_fixture<R, B>(
    pipeline: &DeliveryPipeline<'_, B>,
    topic: &str,
    fixture: &Fixture,
) -> Result<BatchReport, SenderError>
where
    R: SourceRecord,
    B: BrokerClient + ?Sized,
{
    let records: Vec<R> = if fixture.required {
        load_records(&fixture.path)?
    } else {
        load_optional_records(&fixture.path)?
    };

    let channel = R::CHANNEL;
    info!(
        channel = %channel,
        topic = %topic,
        path = %fixture.path.display(),
        "Sending {} {} record(s)",
        records.len(),
        channel
    );

    pipeline
        .send_batch(topic, &records, |index, record| {
            record.to_event(source_message_id(fixture.id_prefix, index))
        })
        .await
}
