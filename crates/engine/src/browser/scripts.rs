//! In-page JavaScript used by the Chromium driver.
//!
//! Every script is an arrow function taking one JSON argument; [`invoke`]
//! wraps it with the shared prelude into a self-contained expression.

use serde::Serialize;

const PRELUDE: &str = r#"
const MODAL_SELECTOR = '[role="dialog"], .modal, .popup, [class*="modal"], [class*="popup"], [class*="dialog"]';
const OVERLAY_SELECTOR = '[class*="overlay"], [class*="backdrop"]';
const isVisible = (el) => {
  if (!el) return false;
  const style = window.getComputedStyle(el);
  return style.display !== 'none' && style.visibility !== 'hidden' && style.opacity !== '0';
};
const visibleModals = () => Array.from(document.querySelectorAll(MODAL_SELECTOR)).filter(isVisible);
const refFor = (el) => {
  if (el.id) return '#' + CSS.escape(el.id);
  window.__autoqaRef = (window.__autoqaRef || 0) + 1;
  el.setAttribute('data-autoqa-ref', String(window.__autoqaRef));
  return '[data-autoqa-ref="' + window.__autoqaRef + '"]';
};
const textOf = (el) => (el.textContent || '').trim() || el.getAttribute('aria-label') || el.title || '';
"#;

/// Build an evaluable expression calling `script` with `arg`
pub(crate) fn invoke(script: &str, arg: &impl Serialize) -> String {
    let arg = serde_json::to_string(arg).unwrap_or_else(|_| "null".to_string());
    format!("(() => {{ {PRELUDE}\n return ({script})({arg}); }})()")
}

pub(crate) const ELEMENT_EXISTS: &str = r#"(sel) => document.querySelector(sel) !== null"#;

pub(crate) const ELEMENT_INFO: &str = r#"(sel) => {
  const el = document.querySelector(sel);
  if (!el) return null;
  return {
    tag: el.tagName.toLowerCase(),
    text: (el.textContent || '').trim().slice(0, 200),
    id: el.id || null,
    classes: typeof el.className === 'string' ? el.className : '',
    role: el.getAttribute('role'),
    input_type: el.getAttribute('type'),
    aria_label: el.getAttribute('aria-label'),
    href: el.getAttribute('href'),
    title: el.getAttribute('title'),
    data_toggle: el.getAttribute('data-toggle') || el.getAttribute('data-bs-toggle'),
    visible: isVisible(el) && el.getClientRects().length > 0,
    disabled: !!el.disabled || el.getAttribute('aria-disabled') === 'true'
  };
}"#;

pub(crate) const TABLE_ROWS: &str = r#"(sel) => {
  const root = document.querySelector(sel);
  if (!root) return { total: 0, header: 0, grid: 0 };
  const rows = Array.from(root.querySelectorAll('tr'));
  const header = rows.filter(r => r.closest('thead') || (r.cells.length > 0 && Array.from(r.cells).every(c => c.tagName === 'TH'))).length;
  return { total: rows.length, header, grid: root.querySelectorAll('[role="row"]').length };
}"#;

pub(crate) const FIND_BY_TEXT: &str = r#"(args) => {
  const scope = args.scope ? document.querySelector(args.scope) : document;
  if (!scope) return null;
  const wanted = args.text.trim().toLowerCase();
  const el = Array.from(scope.querySelectorAll(args.candidates))
    .find(e => (e.textContent || '').trim().toLowerCase().includes(wanted));
  return el ? refFor(el) : null;
}"#;

pub(crate) const SET_VALUE: &str = r#"(args) => {
  const el = document.querySelector(args.selector);
  if (!el) return false;
  el.focus();
  const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
  const setter = Object.getOwnPropertyDescriptor(proto, 'value');
  if (setter && setter.set) { setter.set.call(el, args.value); } else { el.value = args.value; }
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return true;
}"#;

pub(crate) const SELECT_OPTION: &str = r#"(args) => {
  const el = document.querySelector(args.selector);
  if (!el || el.tagName !== 'SELECT') return false;
  const opt = Array.from(el.options).find(o => o.value === args.value)
    || Array.from(el.options).find(o => (o.textContent || '').trim() === args.value);
  if (!opt) return false;
  el.value = opt.value;
  opt.selected = true;
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return true;
}"#;

pub(crate) const SCROLL_BY: &str = r#"(dy) => { window.scrollBy(0, dy); return window.scrollY; }"#;

pub(crate) const DROPDOWN_OPTIONS: &str = r#"(sel) => {
  const el = document.querySelector(sel);
  if (!el) return [];
  if (el.tagName === 'SELECT') {
    return Array.from(el.options).map((o, index) => ({
      text: (o.textContent || '').trim(), value: o.value, index, disabled: o.disabled, selected: o.selected
    }));
  }
  if (el.getAttribute('role') === 'listbox' || el.classList.contains('dropdown')) {
    return Array.from(el.querySelectorAll('[role="option"], .dropdown-item, .option')).map((o, index) => ({
      text: (o.textContent || '').trim(),
      value: o.getAttribute('data-value') || (o.textContent || '').trim(),
      index,
      disabled: o.hasAttribute('disabled') || o.classList.contains('disabled'),
      selected: o.getAttribute('aria-selected') === 'true' || o.classList.contains('selected')
    }));
  }
  return [];
}"#;

pub(crate) const PAGE_SIGNATURE: &str = r#"() => ({
  url: window.location.href,
  has_table: document.querySelector('table') !== null,
  has_form: document.querySelector('form') !== null,
  row_count: document.querySelectorAll('table tbody tr, [role="grid"] [role="row"]').length,
  visible_element_count: Array.from(document.querySelectorAll('button, input')).filter(isVisible).length
})"#;

pub(crate) const POPUP_STATE: &str = r#"() => ({
  visible_modal_count: visibleModals().length,
  visible_iframe_count: Array.from(document.querySelectorAll('iframe')).filter(i => {
    const s = window.getComputedStyle(i);
    return s.display !== 'none' && s.visibility !== 'hidden';
  }).length,
  overlay_count: document.querySelectorAll(OVERLAY_SELECTOR).length
})"#;

pub(crate) const POPUP_TABS: &str = r#"() => {
  const modal = visibleModals()[0];
  if (!modal) return [];
  const results = [];
  const seen = new Set();
  const tabSelectors = ['[role="tab"]', '.tab', '[data-tab]', 'button[aria-controls]', '.nav-tabs button', '.nav-tabs a', '.tab-list button', '.tab-list a'];
  for (const sel of tabSelectors) {
    modal.querySelectorAll(sel).forEach(el => {
      if (seen.has(el)) return;
      seen.add(el);
      const text = textOf(el);
      if (!text && !el.id) return;
      results.push({
        text,
        selector: refFor(el),
        kind: 'tab',
        active: el.getAttribute('aria-selected') === 'true' || el.classList.contains('active') || el.classList.contains('selected'),
        parent_selector: null
      });
    });
  }
  modal.querySelectorAll('select').forEach(select => {
    const parent = refFor(select);
    Array.from(select.options).forEach(opt => {
      const text = (opt.textContent || '').trim();
      if (!text || opt.disabled) return;
      results.push({ text, selector: parent, kind: 'option', active: opt.selected, parent_selector: parent });
    });
  });
  return results;
}"#;

pub(crate) const POPUP_BUTTONS: &str = r#"(limit) => {
  const modal = visibleModals()[0];
  if (!modal) return [];
  return Array.from(modal.querySelectorAll('button, [role="button"], a[role="button"]'))
    .filter(b => {
      const t = (b.textContent || '').trim().toLowerCase();
      return t && !t.includes('close') && !t.includes('cancel');
    })
    .slice(0, limit)
    .map(b => ({ text: (b.textContent || '').trim(), selector: refFor(b) }));
}"#;

pub(crate) const POPUP_CONTENT: &str = r#"() => {
  const modal = visibleModals()[0];
  if (!modal) return null;
  return {
    has_table: modal.querySelector('table') !== null,
    has_form: modal.querySelector('form') !== null,
    has_list: modal.querySelector('ul, ol') !== null,
    button_count: modal.querySelectorAll('button').length,
    input_count: modal.querySelectorAll('input, select, textarea').length
  };
}"#;

pub(crate) const CLOSE_BUTTON: &str = r#"() => {
  const candidates = [
    '[aria-label*="close" i]', '[aria-label*="dismiss" i]', '.close', '.btn-close',
    '[data-dismiss="modal"]', '[data-bs-dismiss="modal"]', '[class*="close"]'
  ];
  for (const modal of visibleModals()) {
    for (const sel of candidates) {
      const el = Array.from(modal.querySelectorAll(sel)).find(isVisible);
      if (el) return refFor(el);
    }
    const byText = Array.from(modal.querySelectorAll('button, [role="button"]'))
      .find(b => isVisible(b) && ['×', 'x', 'close', 'cancel', 'no thanks', 'dismiss'].includes((b.textContent || '').trim().toLowerCase()));
    if (byText) return refFor(byText);
  }
  return null;
}"#;

pub(crate) const IFRAME_SOURCES: &str =
    r#"() => Array.from(document.querySelectorAll('iframe')).map(i => i.src || i.getAttribute('src') || '')"#;

pub(crate) const REMOVE_IFRAMES: &str = r#"(hosts) => {
  let removed = 0;
  document.querySelectorAll('iframe').forEach(frame => {
    const src = (frame.src || '').toLowerCase();
    if (hosts.length === 0 || hosts.some(h => src.includes(h))) {
      frame.remove();
      removed++;
    }
  });
  return removed;
}"#;

pub(crate) const HIDE_OVERLAYS: &str = r#"() => {
  let hidden = 0;
  document.querySelectorAll(MODAL_SELECTOR + ', ' + OVERLAY_SELECTOR).forEach(el => {
    if (isVisible(el)) {
      el.style.setProperty('display', 'none', 'important');
      hidden++;
    }
  });
  document.body.style.overflow = '';
  return hidden;
}"#;

pub(crate) const FONTS_READY: &str = r#"() => document.fonts ? document.fonts.ready.then(() => true) : true"#;

pub(crate) const IMAGES_READY: &str = r#"(capMs) => Promise.all(Array.from(document.images).map(img => {
  if (img.complete) return true;
  return new Promise(resolve => {
    img.onload = () => resolve(true);
    img.onerror = () => resolve(true);
    setTimeout(() => resolve(false), capMs);
  });
})).then(() => true)"#;

pub(crate) const RESOURCE_COUNT: &str =
    r#"() => ({ ready: document.readyState === 'complete', resources: performance.getEntriesByType('resource').length })"#;
