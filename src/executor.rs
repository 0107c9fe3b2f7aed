use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{PageError, StepError};
use crate::page::{DomEvent, ElementRef, KeyKind, MouseKind, Outcome, Page, Selector, Target};
use crate::placeholder::PlaceholderResolver;
use crate::types::{DEFAULT_KEY, RunOptions, Step};

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a successfully performed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub label: String,
}

impl StepOutcome {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

/// Performs one step against the page.
pub struct StepExecutor {
    page: Arc<dyn Page>,
    placeholders: PlaceholderResolver,
}

impl StepExecutor {
    pub fn new(page: Arc<dyn Page>, placeholders: PlaceholderResolver) -> Self {
        Self { page, placeholders }
    }

    pub async fn perform(&self, step: &Step, options: &RunOptions) -> Result<StepOutcome, StepError> {
        let timeout = step.timeout_ms(options);
        let highlight_ms = options.highlight_ms;

        match step {
            Step::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(StepOutcome::new(format!("Wait {ms} ms")))
            }
            Step::WaitFor { selector, .. } => {
                let el = self.wait_for(selector, timeout).await?;
                self.flash(el, Outcome::Success, highlight_ms).await;
                Ok(StepOutcome::new(format!("Wait for element {selector}")))
            }
            Step::Click { selector, .. } => {
                let el = self.wait_for(selector, timeout).await?;
                self.flash(el, Outcome::Success, highlight_ms).await;
                self.click(el).await?;
                Ok(StepOutcome::new(format!("Click {selector}")))
            }
            Step::Type {
                selector,
                text,
                random_preset,
                fake,
                ..
            } => {
                let el = self.wait_for(selector, timeout).await?;
                let typed = async {
                    let raw = match (random_preset, fake) {
                        (Some(preset), _) => preset.generate(),
                        (None, Some(kind)) => self.page.fake(kind).await?,
                        (None, None) => text.clone(),
                    };
                    let value = self.placeholders.resolve(&raw).await;
                    self.page.focus(el).await?;
                    self.page.set_value(el, &value).await?;
                    self.page.dispatch(Target::Element(el), DomEvent::Input).await
                };
                if let Err(e) = typed.await {
                    self.flash(el, Outcome::Failure, highlight_ms).await;
                    return Err(e.into());
                }
                self.flash(el, Outcome::Success, highlight_ms).await;
                let label = match (random_preset, fake) {
                    (Some(preset), _) => format!("Type {} → {selector}", preset.label()),
                    (None, Some(kind)) => format!("Type {kind} → {selector}"),
                    (None, None) => format!("Type → {selector}"),
                };
                Ok(StepOutcome::new(label))
            }
            Step::SelectOption {
                selector,
                value,
                text,
                ..
            } => {
                let el = self.wait_for(selector, timeout).await?;
                let options = self.page.options(el).await?;
                let wanted_value = value.as_deref().filter(|v| !v.is_empty());
                let wanted_text = text.as_deref().filter(|t| !t.is_empty());

                let by_value = wanted_value.and_then(|v| options.iter().find(|o| o.value == v));
                let chosen = by_value.or_else(|| {
                    let target = wanted_text?.trim().to_lowercase();
                    options
                        .iter()
                        .find(|o| o.text.trim().to_lowercase() == target)
                });
                let Some(chosen) = chosen else {
                    self.flash(el, Outcome::Failure, highlight_ms).await;
                    let wanted = wanted_value.or(wanted_text).unwrap_or("n/a");
                    return Err(StepError::OptionNotFound(wanted.to_string()));
                };

                self.page.set_value(el, &chosen.value).await?;
                self.page.dispatch(Target::Element(el), DomEvent::Input).await?;
                self.page.dispatch(Target::Element(el), DomEvent::Change).await?;
                self.flash(el, Outcome::Success, highlight_ms).await;
                let shown = if chosen.text.is_empty() {
                    &chosen.value
                } else {
                    &chosen.text
                };
                Ok(StepOutcome::new(format!("Select {shown} → {selector}")))
            }
            Step::PressKey { key } => {
                let key = key.as_deref().filter(|k| !k.is_empty()).unwrap_or(DEFAULT_KEY);
                for kind in KeyKind::SEQUENCE {
                    let event = DomEvent::Key {
                        kind,
                        key: key.to_string(),
                    };
                    self.page.dispatch(Target::Focused, event).await?;
                }
                Ok(StepOutcome::new(format!("Press {key}")))
            }
            Step::Navigate { url } => {
                let url = self.placeholders.resolve(url).await;
                self.page.navigate(&url).await?;
                Ok(StepOutcome::new(format!("Open URL {url}")))
            }
            Step::Unknown => Err(StepError::UnknownStepType(step.kind().to_string())),
        }
    }

    /// Polls for `selector` until found or `timeout_ms` has elapsed.
    pub async fn wait_for(&self, selector: &str, timeout_ms: u64) -> Result<ElementRef, StepError> {
        let parsed = Selector::parse(selector);
        let timeout = Duration::from_millis(timeout_ms);
        let started = Instant::now();
        loop {
            match self.page.query(&parsed).await {
                Ok(Some(el)) => return Ok(el),
                Ok(None) => {}
                Err(PageError::ContextDestroyed) => return Err(PageError::ContextDestroyed.into()),
                Err(e) => debug!(selector, "lookup failed: {e}"),
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(StepError::ElementNotFound {
                    selector: selector.to_string(),
                    timeout_ms,
                });
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout - elapsed)).await;
        }
    }

    async fn click(&self, el: ElementRef) -> Result<(), StepError> {
        let tag = self.page.tag_name(el).await?;
        if !tag.eq_ignore_ascii_case("select") {
            self.page.click(el).await?;
            return Ok(());
        }

        self.page.focus(el).await?;
        match self.page.show_picker(el).await {
            Ok(true) => return Ok(()),
            Ok(false) => debug!("no native picker, synthesizing pointer gesture"),
            Err(PageError::ContextDestroyed) => return Err(PageError::ContextDestroyed.into()),
            Err(e) => debug!("showPicker threw ({e}), synthesizing pointer gesture"),
        }

        let (x, y) = self.page.bounding_box(el).await?.center();
        for kind in MouseKind::GESTURE {
            self.page
                .dispatch(Target::Element(el), DomEvent::Mouse { kind, x, y })
                .await?;
        }
        Ok(())
    }

    async fn flash(&self, el: ElementRef, outcome: Outcome, ms: u64) {
        if let Err(e) = self.page.highlight(el, outcome, ms).await {
            warn!("highlight failed: {e}");
        }
    }
}
