//! Message translation stages.
//!
//! A [`MessageTranslationStrategy`] turns one input message into an update of its
//! single held output and publishes the result, which makes it a [`DataSource`] over
//! the output type. Consumers of translated data subscribe exactly like consumers of
//! raw sensor data, and a translation can feed another translation.
//!
//! [`TranslationStage`] runs a strategy on its own worker thread, draining an
//! upstream [`Subscriber`] and republishing every translated message.
//!
//! ```rust
//! use sensor_gateway::data::source::DataSource;
//! use sensor_gateway::translation::{translator_fn, MessageTranslationStrategy};
//!
//! # fn main() -> sensor_gateway::GatewayResult<()> {
//! // Running sum of raw readings.
//! let mut sum = MessageTranslationStrategy::<u32, _>::new(
//!     translator_fn(|raw: u32, total: &mut u64| *total += u64::from(raw)),
//!     16,
//! )?;
//! let mut consumer = sum.subscribe();
//!
//! sum.translate_message(2);
//! sum.translate_message(3);
//! assert_eq!(consumer.poll().messages, vec![2, 5]);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::TranslationConfig;
use crate::data::source::{channel, DataSource, Feed, Publisher, Subscriber};
use crate::error::GatewayResult;
use crate::thread::{HighIntegrityThread, Join, StopSignal};

/// One-message-in, one-message-out transform.
///
/// `translate` updates `output` in place; it starts as `Output::default()` and
/// keeps whatever the previous call left, so stateful translations (running sums,
/// last-known values per CAN id) need no state of their own.
pub trait Translate<In>: Send + 'static {
    /// Translated message type.
    type Output: Default + Clone + Send + Sync + 'static;

    /// Fold `input` into `output`.
    fn translate(&mut self, input: In, output: &mut Self::Output);
}

/// [`Translate`] implementation backed by a closure. Build with [`translator_fn`].
pub struct FnTranslator<F, Out> {
    f: F,
    _output: PhantomData<fn() -> Out>,
}

/// Wrap `f` as a translator.
pub fn translator_fn<In, Out, F>(f: F) -> FnTranslator<F, Out>
where
    F: FnMut(In, &mut Out) + Send + 'static,
{
    FnTranslator {
        f,
        _output: PhantomData,
    }
}

impl<In, Out, F> Translate<In> for FnTranslator<F, Out>
where
    F: FnMut(In, &mut Out) + Send + 'static,
    Out: Default + Clone + Send + Sync + 'static,
{
    type Output = Out;

    fn translate(&mut self, input: In, output: &mut Out) {
        (self.f)(input, output)
    }
}

/// Stateful translator that publishes every output it produces.
pub struct MessageTranslationStrategy<In, X: Translate<In>> {
    translator: X,
    output: X::Output,
    publisher: Publisher<X::Output>,
    feed: Feed<X::Output>,
    _input: PhantomData<fn(In)>,
}

impl<In, X: Translate<In>> MessageTranslationStrategy<In, X> {
    /// Wrap `translator`, publishing into a ring of `capacity` pads.
    ///
    /// # Errors
    /// [`crate::GatewayError::InvalidCapacity`] for a zero capacity.
    pub fn new(translator: X, capacity: usize) -> GatewayResult<Self> {
        let (publisher, feed) = channel(capacity)?;
        Ok(Self {
            translator,
            output: X::Output::default(),
            publisher,
            feed,
            _input: PhantomData,
        })
    }

    /// Translate `input`, publish the updated output and return it.
    pub fn translate_message(&mut self, input: In) -> &X::Output {
        self.translator.translate(input, &mut self.output);
        self.publisher.publish(self.output.clone());
        &self.output
    }

    /// Current output (the default until the first translation).
    pub fn output(&self) -> &X::Output {
        &self.output
    }

    /// Messages translated so far.
    pub fn translated(&self) -> u64 {
        self.publisher.published()
    }
}

impl<In, X: Translate<In>> DataSource<X::Output> for MessageTranslationStrategy<In, X> {
    fn feed(&self) -> &Feed<X::Output> {
        &self.feed
    }
}

/// A [`MessageTranslationStrategy`] running on its own worker thread.
pub struct TranslationStage<Out> {
    name: String,
    feed: Feed<Out>,
    stop: StopSignal,
    lost: Arc<AtomicU64>,
    worker: HighIntegrityThread<Join>,
}

impl<Out: Send + Sync + 'static> TranslationStage<Out> {
    /// Start translating everything `upstream` receives from now on.
    ///
    /// The worker polls `upstream`; when there is nothing to read it sleeps for
    /// `poll_interval` (woken early by [`stop`](Self::stop)).
    pub fn spawn<In, X>(
        name: impl Into<String>,
        mut upstream: Subscriber<In>,
        mut strategy: MessageTranslationStrategy<In, X>,
        poll_interval: Duration,
    ) -> GatewayResult<Self>
    where
        In: Clone + Send + Sync + 'static,
        X: Translate<In, Output = Out>,
    {
        let name = name.into();
        let feed = strategy.feed().clone();
        let stop = StopSignal::new();
        let lost = Arc::new(AtomicU64::new(0));

        let worker = {
            let stop = stop.clone();
            let lost = Arc::clone(&lost);
            let stage = name.clone();
            HighIntegrityThread::spawn(format!("{name}-translate"), move || {
                info!(stage = %stage, "Translation stage started");
                while !stop.is_triggered() {
                    let news = upstream.poll();
                    if news.lost > 0 {
                        lost.fetch_add(news.lost as u64, Ordering::Relaxed);
                    }
                    if news.is_empty() {
                        if stop.wait_timeout(poll_interval) {
                            break;
                        }
                        continue;
                    }
                    for message in news {
                        strategy.translate_message(message);
                    }
                }
                info!(
                    stage = %stage,
                    translated = strategy.translated(),
                    "Translation stage stopped"
                );
            })?
        };

        Ok(Self {
            name,
            feed,
            stop,
            lost,
            worker,
        })
    }

    /// [`spawn`](Self::spawn) with the poll interval of a translation config section.
    pub fn from_config<In, X>(
        name: impl Into<String>,
        upstream: Subscriber<In>,
        strategy: MessageTranslationStrategy<In, X>,
        config: &TranslationConfig,
    ) -> GatewayResult<Self>
    where
        In: Clone + Send + Sync + 'static,
        X: Translate<In, Output = Out>,
    {
        Self::spawn(name, upstream, strategy, config.poll_interval)
    }
}

impl<Out> TranslationStage<Out> {
    /// Stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Messages translated so far.
    pub fn translated(&self) -> u64 {
        self.feed.published()
    }

    /// Upstream messages lost to ring overruns before this stage read them.
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    /// True while the worker is executing.
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Stop translating and join the worker. Idempotent.
    pub fn stop(&mut self) {
        if !self.stop.is_triggered() {
            self.stop.trigger();
            if self.lost() > 0 {
                warn!(stage = %self.name, lost = self.lost(), "Translation stage lost upstream messages");
            }
        }
        self.worker.finish();
    }
}

impl<Out> DataSource<Out> for TranslationStage<Out> {
    fn feed(&self) -> &Feed<Out> {
        &self.feed
    }
}

impl<Out> Drop for TranslationStage<Out> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<Out> fmt::Debug for TranslationStage<Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationStage")
            .field("name", &self.name)
            .field("translated", &self.translated())
            .field("lost", &self.lost())
            .field("worker", &self.worker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Keeps the largest reading seen so far.
    struct Peak;

    impl Translate<i32> for Peak {
        type Output = i32;

        fn translate(&mut self, input: i32, output: &mut i32) {
            *output = (*output).max(input);
        }
    }

    #[test]
    fn output_starts_at_default() {
        let strategy = MessageTranslationStrategy::new(Peak, 4).unwrap();
        assert_eq!(*strategy.output(), 0);
        assert_eq!(strategy.translated(), 0);
    }

    #[test]
    fn each_translation_updates_and_publishes() {
        let mut strategy = MessageTranslationStrategy::new(Peak, 8).unwrap();
        let mut consumer = strategy.subscribe();

        assert_eq!(*strategy.translate_message(3), 3);
        assert_eq!(*strategy.translate_message(-1), 3);
        assert_eq!(*strategy.translate_message(9), 9);

        assert_eq!(strategy.translated(), 3);
        assert_eq!(consumer.poll().messages, vec![3, 3, 9]);
    }

    #[test]
    fn closure_translator_changes_type() {
        let mut labels = MessageTranslationStrategy::<u32, _>::new(
            translator_fn(|id: u32, label: &mut String| *label = format!("0x{id:03X}")),
            4,
        )
        .unwrap();
        let mut consumer = labels.subscribe();

        labels.translate_message(0x1a0);
        assert_eq!(consumer.poll().messages, vec!["0x1A0".to_string()]);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(MessageTranslationStrategy::new(Peak, 0).is_err());
    }

    #[test]
    fn stage_translates_upstream_on_its_own_thread() {
        let (mut publisher, upstream) = channel::<i32>(64).unwrap();
        let strategy = MessageTranslationStrategy::new(Peak, 64).unwrap();
        let mut stage = TranslationStage::spawn(
            "peak",
            upstream.subscribe(),
            strategy,
            Duration::from_millis(1),
        )
        .unwrap();
        let mut consumer = stage.subscribe();

        for value in [4, 2, 8, 1] {
            publisher.publish(value);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while stage.translated() < 4 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(consumer.poll().messages, vec![4, 4, 8, 8]);
        assert_eq!(stage.lost(), 0);

        stage.stop();
        assert!(!stage.is_running());
        stage.stop();
    }
}
