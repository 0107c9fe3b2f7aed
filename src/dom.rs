//! A [`Page`] backed by a real Chrome tab over CDP.
//!
//! Every primitive is a small injected script. Located elements are tagged
//! with a `data-macro-ref` attribute so later calls can find them again.

use anyhow::Result;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::PageError;
use crate::page::{DomEvent, ElementRef, Outcome, Page, Rect, SelectOption, Selector, Target};

const STALE: &str = "__macro_ref_stale__";
const THREW: &str = "__macro_threw__:";

const QUERY_JS: &str = r#"
(() => {
  const sel = __SELECTOR__;
  let el = null;
  try {
    if (__XPATH__) {
      const r = document.evaluate(sel, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
      el = r.singleNodeValue;
    } else {
      el = document.querySelector(sel);
    }
  } catch (e) {
    el = null;
  }
  if (!el || !el.setAttribute) return null;
  if (!el.hasAttribute('data-macro-ref')) {
    window.__macroRefSeq = (window.__macroRefSeq || 0) + 1;
    el.setAttribute('data-macro-ref', String(window.__macroRefSeq));
  }
  return el.getAttribute('data-macro-ref');
})()
"#;

const FAKE_JS: &str = r#"
(() => {
  const f = window.faker;
  if (!f) return null;
  const kinds = {
    firstName: () => f.person.firstName(),
    lastName: () => f.person.lastName(),
    fullName: () => f.person.fullName(),
    userName: () => f.internet.userName(),
    email: () => f.internet.email(),
    password: () => f.internet.password(),
    phone: () => f.phone.number(),
    color: () => f.color.human(),
    uuid: () => f.string.uuid(),
    company: () => f.company.name(),
    jobTitle: () => f.person.jobTitle(),
    city: () => f.location.city(),
    country: () => f.location.country(),
    url: () => f.internet.url(),
    ip: () => f.internet.ip(),
    word: () => f.word.sample(),
    sentence: () => f.lorem.sentence(),
    paragraph: () => f.lorem.paragraph(),
  };
  try {
    return String((kinds[__KIND__] || kinds.word)());
  } catch (e) {
    return null;
  }
})()
"#;

pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    async fn eval(&self, script: String) -> Result<Value, PageError> {
        let tab = self.tab.clone();
        let result = tokio::task::spawn_blocking(move || tab.evaluate(&script, false))
            .await
            .map_err(|e| PageError::Browser(format!("evaluation task failed: {e}")))?
            .map_err(classify)?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    /// Runs `body` with `el` bound to the referenced element.
    async fn eval_on(&self, el: ElementRef, body: &str) -> Result<Value, PageError> {
        let script = format!(
            "(() => {{ const el = document.querySelector('[data-macro-ref=\"{}\"]'); \
             if (!el) return '{STALE}'; {body} }})()",
            el.0
        );
        let value = self.eval(script).await?;
        if value.as_str() == Some(STALE) {
            return Err(PageError::StaleElement(el.0));
        }
        Ok(value)
    }

    /// Scripts that stringify their result to dodge remote object handles.
    async fn eval_json<T: serde::de::DeserializeOwned>(
        &self,
        el: ElementRef,
        body: &str,
    ) -> Result<T, PageError> {
        let raw = self.eval_on(el, body).await?;
        let text = raw.as_str().unwrap_or("null");
        serde_json::from_str(text).map_err(|e| PageError::Browser(format!("bad page reply: {e}")))
    }
}

fn classify(e: anyhow::Error) -> PageError {
    let message = format!("{e:#}");
    if message.contains("context was destroyed") || message.contains("Cannot find context") {
        PageError::ContextDestroyed
    } else {
        PageError::Browser(message)
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn event_constructor(event: &DomEvent) -> String {
    match event {
        DomEvent::Input => "new Event('input', { bubbles: true })".to_string(),
        DomEvent::Change => "new Event('change', { bubbles: true })".to_string(),
        DomEvent::Mouse { kind, x, y } => format!(
            "new MouseEvent('{}', {{ bubbles: true, cancelable: true, view: window, \
             clientX: {x}, clientY: {y}, buttons: 1 }})",
            kind.event_name()
        ),
        DomEvent::Key { kind, key } => format!(
            "new KeyboardEvent('{}', {{ key: {}, bubbles: true }})",
            kind.event_name(),
            js_string(key)
        ),
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn query(&self, selector: &Selector) -> Result<Option<ElementRef>, PageError> {
        let script = QUERY_JS
            .replace("__SELECTOR__", &js_string(selector.as_str()))
            .replace("__XPATH__", if selector.is_xpath() { "true" } else { "false" });
        let value = self.eval(script).await?;
        Ok(value
            .as_str()
            .and_then(|id| id.parse::<u64>().ok())
            .map(ElementRef))
    }

    async fn tag_name(&self, el: ElementRef) -> Result<String, PageError> {
        let value = self.eval_on(el, "return el.tagName || '';").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn bounding_box(&self, el: ElementRef) -> Result<Rect, PageError> {
        self.eval_json(
            el,
            "const r = el.getBoundingClientRect(); \
             return JSON.stringify({ x: r.left, y: r.top, width: r.width || 0, height: r.height || 0 });",
        )
        .await
    }

    async fn focus(&self, el: ElementRef) -> Result<(), PageError> {
        self.eval_on(el, "if (el.focus) el.focus(); return true;").await?;
        Ok(())
    }

    async fn click(&self, el: ElementRef) -> Result<(), PageError> {
        self.eval_on(el, "el.click(); return true;").await?;
        Ok(())
    }

    async fn show_picker(&self, el: ElementRef) -> Result<bool, PageError> {
        let body = format!(
            "if (typeof el.showPicker !== 'function') return false; \
             try {{ el.showPicker(); return true; }} catch (e) {{ return '{THREW}' + e; }}"
        );
        let value = self.eval_on(el, &body).await?;
        match value {
            Value::Bool(shown) => Ok(shown),
            Value::String(s) if s.starts_with(THREW) => {
                Err(PageError::Browser(s[THREW.len()..].to_string()))
            }
            _ => Ok(false),
        }
    }

    async fn set_value(&self, el: ElementRef, value: &str) -> Result<(), PageError> {
        let body = format!("if ('value' in el) el.value = {}; return true;", js_string(value));
        self.eval_on(el, &body).await?;
        Ok(())
    }

    async fn options(&self, el: ElementRef) -> Result<Vec<SelectOption>, PageError> {
        self.eval_json(
            el,
            "return JSON.stringify(Array.from(el.options || []).map(o => ({ value: o.value, text: o.text })));",
        )
        .await
    }

    async fn dispatch(&self, target: Target, event: DomEvent) -> Result<(), PageError> {
        let dispatch = format!("el.dispatchEvent({}); return true;", event_constructor(&event));
        match target {
            Target::Element(el) => {
                self.eval_on(el, &dispatch).await?;
            }
            Target::Focused => {
                let script = format!(
                    "(() => {{ const el = document.activeElement; if (!el) return false; {dispatch} }})()"
                );
                self.eval(script).await?;
            }
        }
        Ok(())
    }

    async fn highlight(&self, el: ElementRef, outcome: Outcome, ms: u64) -> Result<(), PageError> {
        let body = format!(
            "if (!el.style) return false; const prev = el.style.outline; \
             el.style.outline = '2px solid {}'; \
             setTimeout(() => {{ el.style.outline = prev || ''; }}, {ms}); return true;",
            outcome.color()
        );
        self.eval_on(el, &body).await?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        info!("[Page] navigating to {url}");
        let tab = self.tab.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
        .map_err(|e| PageError::Browser(format!("navigation task failed: {e}")))?
        .map_err(classify)
    }

    async fn fake(&self, kind: &str) -> Result<String, PageError> {
        let script = FAKE_JS.replace("__KIND__", &js_string(kind));
        match self.eval(script).await? {
            Value::String(s) => Ok(s),
            _ => Err(PageError::ProviderUnavailable(format!(
                "no faker available in page for {kind}"
            ))),
        }
    }
}

/// The browser and the tab macros are replayed in.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    /// Attaches to a Chrome already listening on the debugging URL, or
    /// launches one.
    pub fn launch(config: &Config) -> Result<Self> {
        info!("[Browser] attaching to Chrome at {}", config.chrome_url);
        match Browser::connect(config.chrome_url.clone()) {
            Ok(browser) => {
                let existing = {
                    let tabs = browser
                        .get_tabs()
                        .lock()
                        .map_err(|_| anyhow::anyhow!("tab list lock poisoned"))?;
                    tabs.first().cloned()
                };
                let tab = match existing {
                    Some(tab) => {
                        debug!("[Browser] using existing tab");
                        tab
                    }
                    None => browser.new_tab()?,
                };
                return Ok(Self {
                    _browser: browser,
                    tab,
                });
            }
            Err(e) => warn!("[Browser] attach failed ({e:#}), launching a new instance"),
        }

        let options = LaunchOptions {
            headless: config.headless,
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
                std::ffi::OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: std::time::Duration::from_secs(600),
            ..Default::default()
        };
        let browser = Browser::new(options)
            .map_err(|e| anyhow::anyhow!("browser launch failed: {e:#}"))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("[Browser] Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    pub fn page(&self) -> ChromePage {
        ChromePage::new(self.tab.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{KeyKind, MouseKind};

    #[test]
    fn events_are_built_as_bubbling_constructors() {
        let click = event_constructor(&DomEvent::Mouse {
            kind: MouseKind::PointerDown,
            x: 5.0,
            y: 7.5,
        });
        assert!(click.starts_with("new MouseEvent('pointerdown'"));
        assert!(click.contains("clientX: 5, clientY: 7.5, buttons: 1"));

        let key = event_constructor(&DomEvent::Key {
            kind: KeyKind::KeyUp,
            key: "O'Brien".into(),
        });
        assert_eq!(
            key,
            "new KeyboardEvent('keyup', { key: \"O'Brien\", bubbles: true })"
        );
    }

    #[test]
    fn destroyed_context_errors_are_recognized() {
        let e = classify(anyhow::anyhow!("Execution context was destroyed."));
        assert!(matches!(e, PageError::ContextDestroyed));
        let other = classify(anyhow::anyhow!("socket closed"));
        assert!(matches!(other, PageError::Browser(_)));
    }
}
