//! Capture orchestration.
//!
//! A request collects records into its own [`RequestBuffer`]; nothing reaches
//! a sink until [`Capture::finish`] runs at the end of the request. Each sink
//! fails independently and never affects the response.

use crate::core::config::{CaptureConfig, Config};
use crate::core::{Malformed, MetricKind, MetricRecord, RequestContext, Result};
use crate::live::LiveTail;
use crate::metrics::{Collator, GaugeExporter};
use crate::receiver::builder::{Beacon, RecordBuilder};
use crate::sampling::{NoiseFilter, Sampler, SamplingDecision};
use crate::storage::{AggregationStore, FlushReport};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Records gathered during one request
#[derive(Debug, Clone, Default)]
pub struct RequestBuffer {
    aggregate: Vec<MetricRecord>,
    live: Vec<MetricRecord>,
    collate: Vec<MetricRecord>,
}

impl RequestBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregate.is_empty() && self.live.is_empty() && self.collate.is_empty()
    }

    pub fn aggregate(&self) -> &[MetricRecord] {
        &self.aggregate
    }

    pub fn live(&self) -> &[MetricRecord] {
        &self.live
    }

    pub fn collate(&self) -> &[MetricRecord] {
        &self.collate
    }
}

/// What happened to a submitted record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Routed to at least one list
    Buffered,
    /// Matched a noise pattern
    Filtered,
    /// No sink wanted the record
    Ignored,
}

/// What happened to an ingested beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    SampledOut,
    Submitted(Submission),
}

/// Outcome of [`Capture::finish`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishReport {
    pub flush: Option<FlushReport>,
    pub live_written: usize,
    pub collated: usize,
}

/// Routes records to the aggregation store, the live tail and collation
pub struct Capture {
    flags: CaptureConfig,
    sampler: Sampler,
    noise: Option<NoiseFilter>,
    builder: RecordBuilder,
    store: Option<Arc<AggregationStore>>,
    live: Arc<LiveTail>,
    collator: Mutex<Collator>,
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("flags", &self.flags)
            .field("store", &self.store)
            .field("live_available", &self.live.available())
            .finish()
    }
}

impl Capture {
    pub fn new(
        config: &Config,
        store: Option<Arc<AggregationStore>>,
        live: Arc<LiveTail>,
        exporter: Option<Arc<dyn GaugeExporter>>,
    ) -> Result<Self> {
        let flags = config.capture.clone();
        let noise = if flags.smart_filter {
            Some(NoiseFilter::new(&config.server.beacon_path, &config.server.live_path)?)
        } else {
            None
        };
        let mut collator = Collator::new(config.metrics.window);
        if let Some(exporter) = exporter {
            collator = collator.with_exporter(exporter, flags.metrics_enabled);
        }
        Ok(Self {
            sampler: Sampler::from_config(&flags),
            builder: RecordBuilder::new(flags.page_path_cut, flags.resource_path_cut),
            flags,
            noise,
            store,
            live,
            collator: Mutex::new(collator),
        })
    }

    pub fn live(&self) -> &LiveTail {
        &self.live
    }

    pub fn store(&self) -> Option<&AggregationStore> {
        self.store.as_deref()
    }

    /// Head sampling for a beacon of `kind`
    pub fn should_capture(&self, kind: MetricKind) -> bool {
        self.sampler.decide(kind) == SamplingDecision::Keep
    }

    /// Parse, sample, build and submit one beacon body observed on `date`
    pub fn ingest(
        &self,
        buffer: &mut RequestBuffer,
        body: &[u8],
        context: &RequestContext,
        date: NaiveDate,
    ) -> std::result::Result<IngestOutcome, Malformed> {
        let beacon = Beacon::from_slice(body)?;
        let kind = beacon.kind()?;
        if !self.should_capture(kind) {
            trace!(kind = %kind, "Beacon sampled out");
            return Ok(IngestOutcome::SampledOut);
        }
        let record = self.builder.build(&beacon, context, date)?;
        if let Some(noise) = &self.noise {
            let path = beacon.url_path()?;
            if noise.is_noise_path(&path) {
                debug!(path = %path, "Filtered noise beacon");
                return Ok(IngestOutcome::Submitted(Submission::Filtered));
            }
        }
        Ok(IngestOutcome::Submitted(self.submit(buffer, record)))
    }

    /// Route a built record into the request's lists
    pub fn submit(&self, buffer: &mut RequestBuffer, record: MetricRecord) -> Submission {
        if let Some(noise) = &self.noise {
            if noise.is_noise(&record) {
                debug!(endpoint = %record.endpoint, "Filtered noise record");
                return Submission::Filtered;
            }
        }

        let aggregate = if record.kind.is_resource() {
            self.flags.resource_enabled
        } else {
            self.flags.page_enabled
        };
        let live = self.flags.live_enabled;
        let collate = self.flags.metrics_enabled && record.kind == MetricKind::WebVital;

        if !(aggregate || live || collate) {
            return Submission::Ignored;
        }
        if collate {
            buffer.collate.push(record.clone());
        }
        if live {
            buffer.live.push(record.clone());
        }
        if aggregate {
            buffer.aggregate.push(record);
        }
        Submission::Buffered
    }

    /// End-of-request hook: drain the buffer into every sink
    pub fn finish(&self, buffer: RequestBuffer) -> FinishReport {
        let mut report = FinishReport::default();

        if !buffer.aggregate.is_empty() {
            if let Some(store) = &self.store {
                report.flush = Some(store.flush(&buffer.aggregate));
            }
        }

        if !buffer.live.is_empty() {
            match self.live.write(&buffer.live) {
                Ok(written) => report.live_written = written,
                Err(e) => error!(category = e.category(), "Live tail write failed: {}", e),
            }
        }

        if !buffer.collate.is_empty() {
            self.collator.lock().collate(&buffer.collate, Utc::now());
            report.collated = buffer.collate.len();
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::LiveConfig;
    use crate::core::ConfigBuilder;
    use crate::live::LiveContext;
    use crate::storage::{MemoryBackend, Table};

    fn capture(config: &Config) -> Capture {
        let store = Arc::new(AggregationStore::new(Arc::new(MemoryBackend::new()), 30, 2));
        let live = Arc::new(LiveTail::unavailable(&LiveConfig::default(), LiveContext::Server));
        Capture::new(config, Some(store), live, None).unwrap()
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    const LCP: &[u8] = br#"{"type":"webvital","resource":"https://example.com/blog/post","authenticated":0,"metrics":[{"name":"LCP","value":2.1}]}"#;

    #[test]
    fn test_routing_flags() {
        let config = ConfigBuilder::new().metrics_enabled(true).build().unwrap();
        let capture = capture(&config);
        let mut buffer = RequestBuffer::new();
        let outcome = capture.ingest(&mut buffer, LCP, &RequestContext::default(), today()).unwrap();
        assert_eq!(outcome, IngestOutcome::Submitted(Submission::Buffered));
        assert_eq!(buffer.aggregate().len(), 1);
        assert_eq!(buffer.live().len(), 1);
        assert_eq!(buffer.collate().len(), 1);
        assert_eq!(buffer.aggregate()[0].measure("LCP_sum"), 2100);
    }

    #[test]
    fn test_sampled_out_at_zero() {
        let config = ConfigBuilder::new().sample_permille(0, 1000).build().unwrap();
        let capture = capture(&config);
        let mut buffer = RequestBuffer::new();
        let outcome = capture.ingest(&mut buffer, LCP, &RequestContext::default(), today()).unwrap();
        assert_eq!(outcome, IngestOutcome::SampledOut);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_own_routes_filtered() {
        let config = ConfigBuilder::new().build().unwrap();
        let capture = capture(&config);
        let mut buffer = RequestBuffer::new();
        let body = br#"{"type":"navigation","resource":"https://example.com/perftail/live","authenticated":true,"metrics":[{"name":"load","value":0.3}]}"#;
        let outcome = capture.ingest(&mut buffer, body, &RequestContext::default(), today()).unwrap();
        assert_eq!(outcome, IngestOutcome::Submitted(Submission::Filtered));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_own_routes_filtered_before_truncation() {
        let config = Config::default();
        assert_eq!(config.capture.resource_path_cut, 1);
        let capture = capture(&config);
        let mut buffer = RequestBuffer::new();
        let body = br#"{"type":"resource","resource":"https://example.com/perftail/live?index=0","authenticated":0,"metrics":[{"name":"load","value":0.02}]}"#;
        let outcome = capture.ingest(&mut buffer, body, &RequestContext::default(), today()).unwrap();
        assert_eq!(outcome, IngestOutcome::Submitted(Submission::Filtered));
        assert!(buffer.is_empty());

        let body = br#"{"type":"resource","resource":"https://example.com/perftail/app.js","authenticated":0,"metrics":[{"name":"load","value":0.02}]}"#;
        let outcome = capture.ingest(&mut buffer, body, &RequestContext::default(), today()).unwrap();
        assert_eq!(outcome, IngestOutcome::Submitted(Submission::Buffered));
        assert_eq!(buffer.aggregate()[0].endpoint, "/perftail");
    }

    #[test]
    fn test_finish_flushes_to_store() {
        let config = ConfigBuilder::new().live_enabled(false).build().unwrap();
        let capture = capture(&config);
        let mut buffer = RequestBuffer::new();
        capture.ingest(&mut buffer, LCP, &RequestContext::default(), today()).unwrap();
        let report = capture.finish(buffer);
        assert_eq!(report.flush.unwrap().upserted.get(&Table::Statistics), Some(&1));
        assert_eq!(report.live_written, 0);
        assert_eq!(report.collated, 0);
    }

    #[test]
    fn test_malformed_beacon() {
        let capture = capture(&Config::default());
        let mut buffer = RequestBuffer::new();
        let err = capture
            .ingest(&mut buffer, br#"{"type":"webvital"}"#, &RequestContext::default(), today())
            .unwrap_err();
        assert_eq!(err, Malformed::MissingField("resource"));
    }
}
