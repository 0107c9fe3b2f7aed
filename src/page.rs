//! The live document a macro is replayed against.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::PageError;

/// A selector string, classified as XPath or CSS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let xpath = ["//", "(/", "(//", ".//"]
            .iter()
            .any(|prefix| trimmed.starts_with(prefix));
        if xpath {
            Selector::XPath(trimmed.to_string())
        } else {
            Selector::Css(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Selector::Css(s) | Selector::XPath(s) => s,
        }
    }

    pub fn is_xpath(&self) -> bool {
        matches!(self, Selector::XPath(_))
    }
}

/// Opaque handle to an element found by [`Page::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn color(self) -> &'static str {
        match self {
            Outcome::Success => "#22c55e",
            Outcome::Failure => "#ef4444",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseKind {
    PointerDown,
    MouseDown,
    PointerUp,
    MouseUp,
    Click,
}

impl MouseKind {
    /// The order a real pointer click produces.
    pub const GESTURE: [MouseKind; 5] = [
        MouseKind::PointerDown,
        MouseKind::MouseDown,
        MouseKind::PointerUp,
        MouseKind::MouseUp,
        MouseKind::Click,
    ];

    pub fn event_name(self) -> &'static str {
        match self {
            MouseKind::PointerDown => "pointerdown",
            MouseKind::MouseDown => "mousedown",
            MouseKind::PointerUp => "pointerup",
            MouseKind::MouseUp => "mouseup",
            MouseKind::Click => "click",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    KeyDown,
    KeyPress,
    KeyUp,
}

impl KeyKind {
    pub const SEQUENCE: [KeyKind; 3] = [KeyKind::KeyDown, KeyKind::KeyPress, KeyKind::KeyUp];

    pub fn event_name(self) -> &'static str {
        match self {
            KeyKind::KeyDown => "keydown",
            KeyKind::KeyPress => "keypress",
            KeyKind::KeyUp => "keyup",
        }
    }
}

/// A synthetic, bubbling DOM event.
#[derive(Debug, Clone, PartialEq)]
pub enum DomEvent {
    Input,
    Change,
    Mouse { kind: MouseKind, x: f64, y: f64 },
    Key { kind: KeyKind, key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Element(ElementRef),
    Focused,
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Single lookup attempt. Unparseable selectors resolve to `None`.
    async fn query(&self, selector: &Selector) -> Result<Option<ElementRef>, PageError>;
    async fn tag_name(&self, el: ElementRef) -> Result<String, PageError>;
    async fn bounding_box(&self, el: ElementRef) -> Result<Rect, PageError>;
    async fn focus(&self, el: ElementRef) -> Result<(), PageError>;
    async fn click(&self, el: ElementRef) -> Result<(), PageError>;
    /// `Ok(false)` when the element has no native picker.
    async fn show_picker(&self, el: ElementRef) -> Result<bool, PageError>;
    async fn set_value(&self, el: ElementRef, value: &str) -> Result<(), PageError>;
    async fn options(&self, el: ElementRef) -> Result<Vec<SelectOption>, PageError>;
    async fn dispatch(&self, target: Target, event: DomEvent) -> Result<(), PageError>;
    async fn highlight(&self, el: ElementRef, outcome: Outcome, ms: u64) -> Result<(), PageError>;
    async fn navigate(&self, url: &str) -> Result<(), PageError>;
    /// Realistic value of a semantic kind ("firstName", "city", ...).
    async fn fake(&self, kind: &str) -> Result<String, PageError>;
}

/// What happened on a [`MemoryPage`], in order.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Focused(String),
    Clicked(String),
    PickerShown(String),
    ValueSet { selector: String, value: String },
    Dispatched { target: Option<String>, event: DomEvent },
    Highlighted { selector: String, outcome: Outcome },
    Navigated(String),
}

/// Element definition for a [`MemoryPage`].
#[derive(Debug, Clone)]
pub struct MemoryElement {
    pub tag: String,
    pub value: String,
    pub options: Vec<SelectOption>,
    pub rect: Rect,
    pub picker: PickerSupport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerSupport {
    Native,
    Missing,
    Throws,
}

impl MemoryElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            value: String::new(),
            options: Vec::new(),
            rect: Rect {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 20.0,
            },
            picker: PickerSupport::Missing,
        }
    }

    pub fn with_options(mut self, options: &[(&str, &str)]) -> Self {
        self.options = options
            .iter()
            .map(|(value, text)| SelectOption {
                value: value.to_string(),
                text: text.to_string(),
            })
            .collect();
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn with_picker(mut self, picker: PickerSupport) -> Self {
        self.picker = picker;
        self
    }
}

struct Slot {
    selector: String,
    element: MemoryElement,
    visible_from: Instant,
}

#[derive(Default)]
struct Document {
    slots: Vec<Slot>,
    focused: Option<usize>,
    url: String,
    journal: Vec<PageEvent>,
    fakes: HashMap<String, String>,
    navigation_destroys_context: bool,
}

/// A scripted in-memory document for tests and offline rehearsal.
///
/// Elements are matched by their exact selector string, CSS or XPath alike.
#[derive(Default)]
pub struct MemoryPage {
    doc: Mutex<Document>,
}

impl MemoryPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, selector: &str, element: MemoryElement) {
        self.insert_after(selector, element, Duration::ZERO);
    }

    /// The element only becomes visible to queries after `delay`.
    pub fn insert_after(&self, selector: &str, element: MemoryElement, delay: Duration) {
        self.with_doc(|doc| {
            doc.slots.push(Slot {
                selector: selector.to_string(),
                element,
                visible_from: Instant::now() + delay,
            })
        });
    }

    pub fn set_fake(&self, kind: &str, value: &str) {
        self.with_doc(|doc| {
            doc.fakes.insert(kind.to_string(), value.to_string());
        });
    }

    /// Makes `navigate` report the hosting context as destroyed.
    pub fn destroy_context_on_navigate(&self, enabled: bool) {
        self.with_doc(|doc| doc.navigation_destroys_context = enabled);
    }

    pub fn journal(&self) -> Vec<PageEvent> {
        self.with_doc(|doc| doc.journal.clone())
    }

    pub fn value_of(&self, selector: &str) -> Option<String> {
        self.with_doc(|doc| {
            doc.slots
                .iter()
                .find(|s| s.selector == selector)
                .map(|s| s.element.value.clone())
        })
    }

    pub fn url(&self) -> String {
        self.with_doc(|doc| doc.url.clone())
    }

    pub fn navigations(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|e| match e {
                PageEvent::Navigated(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    fn with_doc<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut doc = match self.doc.lock() {
            Ok(doc) => doc,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut doc)
    }

    fn with_slot<R>(
        &self,
        el: ElementRef,
        f: impl FnOnce(&mut Document, usize) -> R,
    ) -> Result<R, PageError> {
        self.with_doc(|doc| {
            let index = el.0 as usize;
            if index >= doc.slots.len() {
                return Err(PageError::StaleElement(el.0));
            }
            Ok(f(doc, index))
        })
    }
}

#[async_trait]
impl Page for MemoryPage {
    async fn query(&self, selector: &Selector) -> Result<Option<ElementRef>, PageError> {
        let now = Instant::now();
        Ok(self.with_doc(|doc| {
            doc.slots
                .iter()
                .position(|s| s.selector == selector.as_str() && s.visible_from <= now)
                .map(|i| ElementRef(i as u64))
        }))
    }

    async fn tag_name(&self, el: ElementRef) -> Result<String, PageError> {
        self.with_slot(el, |doc, i| doc.slots[i].element.tag.clone())
    }

    async fn bounding_box(&self, el: ElementRef) -> Result<Rect, PageError> {
        self.with_slot(el, |doc, i| doc.slots[i].element.rect)
    }

    async fn focus(&self, el: ElementRef) -> Result<(), PageError> {
        self.with_slot(el, |doc, i| {
            doc.focused = Some(i);
            let selector = doc.slots[i].selector.clone();
            doc.journal.push(PageEvent::Focused(selector));
        })
    }

    async fn click(&self, el: ElementRef) -> Result<(), PageError> {
        self.with_slot(el, |doc, i| {
            let selector = doc.slots[i].selector.clone();
            doc.journal.push(PageEvent::Clicked(selector));
        })
    }

    async fn show_picker(&self, el: ElementRef) -> Result<bool, PageError> {
        self.with_slot(el, |doc, i| match doc.slots[i].element.picker {
            PickerSupport::Native => {
                let selector = doc.slots[i].selector.clone();
                doc.journal.push(PageEvent::PickerShown(selector));
                Ok(true)
            }
            PickerSupport::Missing => Ok(false),
            PickerSupport::Throws => Err(PageError::Browser(
                "showPicker requires a user gesture".into(),
            )),
        })?
    }

    async fn set_value(&self, el: ElementRef, value: &str) -> Result<(), PageError> {
        self.with_slot(el, |doc, i| {
            doc.slots[i].element.value = value.to_string();
            let selector = doc.slots[i].selector.clone();
            doc.journal.push(PageEvent::ValueSet {
                selector,
                value: value.to_string(),
            });
        })
    }

    async fn options(&self, el: ElementRef) -> Result<Vec<SelectOption>, PageError> {
        self.with_slot(el, |doc, i| doc.slots[i].element.options.clone())
    }

    async fn dispatch(&self, target: Target, event: DomEvent) -> Result<(), PageError> {
        self.with_doc(|doc| {
            let index = match target {
                Target::Element(el) => Some(el.0 as usize),
                Target::Focused => doc.focused,
            };
            let target = index.and_then(|i| doc.slots.get(i)).map(|s| s.selector.clone());
            doc.journal.push(PageEvent::Dispatched { target, event });
        });
        Ok(())
    }

    async fn highlight(&self, el: ElementRef, outcome: Outcome, _ms: u64) -> Result<(), PageError> {
        self.with_slot(el, |doc, i| {
            let selector = doc.slots[i].selector.clone();
            doc.journal.push(PageEvent::Highlighted { selector, outcome });
        })
    }

    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        self.with_doc(|doc| {
            doc.url = url.to_string();
            doc.focused = None;
            doc.journal.push(PageEvent::Navigated(url.to_string()));
            if doc.navigation_destroys_context {
                Err(PageError::ContextDestroyed)
            } else {
                Ok(())
            }
        })
    }

    async fn fake(&self, kind: &str) -> Result<String, PageError> {
        self.with_doc(|doc| doc.fakes.get(kind).cloned())
            .ok_or_else(|| PageError::ProviderUnavailable(format!("no generator for {kind}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpath_prefixes_are_recognized() {
        for raw in ["//div", "(//a)[2]", "(/html)", ".//span", "  //p"] {
            assert!(Selector::parse(raw).is_xpath(), "{raw}");
        }
        for raw in ["#id", "div > a", "/html", "[data-x='//']"] {
            assert!(!Selector::parse(raw).is_xpath(), "{raw}");
        }
    }

    #[test]
    fn rect_center_is_midpoint() {
        let rect = Rect {
            x: 10.0,
            y: 20.0,
            width: 40.0,
            height: 10.0,
        };
        assert_eq!(rect.center(), (30.0, 25.0));
    }
}
