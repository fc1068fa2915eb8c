//! 页面脚本
//!
//! 所有脚本都是自执行函数，参数通过 JSON 内联，返回值可以直接反序列化。

use crate::error::SessionResult;
use crate::models::{ListingLayout, Selector};

/// 上传阶段给文件输入框打的标记
pub const FILE_INPUT_MARKER: &str = "[data-mps-upload=\"1\"]";

const HELPERS: &str = r#"
const __mpsVisible = (el) => !!(el && (el.offsetWidth || el.offsetHeight || el.getClientRects().length));
const __mpsText = (el) => ((el.innerText || el.value || el.textContent || '') + '').toLowerCase();
const __mpsFind = (cands, requireVisible) => {
  for (const c of cands) {
    let nodes;
    try { nodes = document.querySelectorAll(c.css); } catch (e) { continue; }
    for (const el of nodes) {
      if (requireVisible && !__mpsVisible(el)) continue;
      if (c.text && !__mpsText(el).includes(c.text.toLowerCase())) continue;
      return el;
    }
  }
  return null;
};
"#;

fn wrap(args: String, body: &str) -> String {
    format!("(() => {{\n{}\n{}\n{}\n}})()", HELPERS, args, body)
}

fn json<T: serde::Serialize + ?Sized>(value: &T) -> SessionResult<String> {
    Ok(serde_json::to_string(value)?)
}

const CLICK_BODY: &str = r#"
const el = __mpsFind(cands, true);
if (!el) return false;
el.scrollIntoView({ block: 'center' });
el.click();
return true;
"#;

pub fn click_first(candidates: &[Selector]) -> SessionResult<String> {
    Ok(wrap(format!("const cands = {};", json(candidates)?), CLICK_BODY))
}

// 使用原生 setter，保证前端框架能收到 input 事件
const FILL_BODY: &str = r#"
const el = __mpsFind(cands, true);
if (!el) return false;
el.focus();
const desc = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value');
if (desc && desc.set) { desc.set.call(el, value); } else { el.value = value; }
el.dispatchEvent(new Event('input', { bubbles: true }));
el.dispatchEvent(new Event('change', { bubbles: true }));
return true;
"#;

pub fn fill_first(candidates: &[Selector], value: &str) -> SessionResult<String> {
    Ok(wrap(
        format!("const cands = {};\nconst value = {};", json(candidates)?, json(value)?),
        FILL_BODY,
    ))
}

// 文件输入框通常是隐藏的，不要求可见
const MARK_FILE_INPUT_BODY: &str = r#"
document.querySelectorAll('[data-mps-upload]').forEach(e => e.removeAttribute('data-mps-upload'));
const el = __mpsFind(cands, false);
if (!el) return false;
el.setAttribute('data-mps-upload', '1');
return true;
"#;

pub fn mark_file_input(candidates: &[Selector]) -> SessionResult<String> {
    Ok(wrap(format!("const cands = {};", json(candidates)?), MARK_FILE_INPUT_BODY))
}

pub fn any_visible(candidates: &[Selector]) -> SessionResult<String> {
    Ok(wrap(
        format!("const cands = {};", json(candidates)?),
        "return __mpsFind(cands, true) !== null;",
    ))
}

pub fn any_present(candidates: &[Selector]) -> SessionResult<String> {
    Ok(wrap(
        format!("const cands = {};", json(candidates)?),
        "return __mpsFind(cands, false) !== null;",
    ))
}

/// 文档加载完成，且最近 500ms 内没有资源请求结束
pub fn network_idle() -> String {
    wrap(
        String::new(),
        r#"
if (document.readyState !== 'complete') return false;
const now = performance.now();
return performance.getEntriesByType('resource').every(r => now - r.responseEnd > 500);
"#,
    )
}

pub fn text_present(keywords: &[String]) -> SessionResult<String> {
    Ok(wrap(
        format!("const kws = {};", json(keywords)?),
        r#"
const body = ((document.body && document.body.innerText) || '').toLowerCase();
return kws.some(k => body.includes(k.toLowerCase()));
"#,
    ))
}

const LIST_ROWS_BODY: &str = r#"
document.querySelectorAll('[data-mps-row]').forEach(e => e.removeAttribute('data-mps-row'));
const out = [];
document.querySelectorAll(rowCss).forEach((row, i) => {
  if (!__mpsVisible(row)) return;
  row.setAttribute('data-mps-row', String(i));
  const cells = Array.from(row.querySelectorAll('td, th, [role="cell"], [role="gridcell"]'))
    .map(c => (c.innerText || '').trim());
  out.push({ handle: String(i), cells, text: (row.innerText || '').trim() });
});
return out;
"#;

/// 读取列表行，并给每一行打上 `data-mps-row` 标记供勾选时定位
pub fn list_rows(layout: &ListingLayout) -> SessionResult<String> {
    Ok(wrap(format!("const rowCss = {};", json(&layout.row_css)?), LIST_ROWS_BODY))
}

const SELECT_ROW_BODY: &str = r#"
const row = document.querySelector('[data-mps-row="' + CSS.escape(handle) + '"]');
if (!row) return false;
const box = row.querySelector(boxCss);
if (!box) return false;
const checked = box.checked === true || box.getAttribute('aria-checked') === 'true';
if (!checked) box.click();
return true;
"#;

pub fn select_row(handle: &str, checkbox_css: &str) -> SessionResult<String> {
    Ok(wrap(
        format!("const handle = {};\nconst boxCss = {};", json(handle)?, json(checkbox_css)?),
        SELECT_ROW_BODY,
    ))
}

const DETECT_ERROR_BODY: &str = r#"
const lowered = kws.map(k => k.toLowerCase());
for (const c of cands) {
  let nodes;
  try { nodes = document.querySelectorAll(c.css); } catch (e) { continue; }
  for (const el of nodes) {
    if (!__mpsVisible(el)) continue;
    const t = __mpsText(el);
    if (lowered.some(k => t.includes(k))) return (el.innerText || '').trim().slice(0, 200);
  }
}
const body = (document.body && document.body.innerText) || '';
const lower = body.toLowerCase();
for (const k of lowered) {
  const i = lower.indexOf(k);
  if (i >= 0) return body.slice(Math.max(0, i - 50), i + 100).trim();
}
return null;
"#;

/// 返回错误提示文本，没有错误时返回 null
pub fn detect_error(indicators: &[Selector], keywords: &[String]) -> SessionResult<String> {
    Ok(wrap(
        format!("const cands = {};\nconst kws = {};", json(indicators)?, json(keywords)?),
        DETECT_ERROR_BODY,
    ))
}

const DISMISS_ERROR_BODY: &str = r#"
const el = __mpsFind(cands, true);
if (el) { el.click(); return true; }
const target = document.activeElement || document.body;
['keydown', 'keyup'].forEach(t => target.dispatchEvent(
  new KeyboardEvent(t, { key: 'Escape', code: 'Escape', keyCode: 27, bubbles: true })));
return false;
"#;

/// 点击关闭按钮；找不到时发送 Escape 并返回 false
pub fn dismiss_error(close_buttons: &[Selector]) -> SessionResult<String> {
    Ok(wrap(format!("const cands = {};", json(close_buttons)?), DISMISS_ERROR_BODY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_are_json_encoded() {
        let script = fill_first(&[Selector::css("input[type=\"email\"]")], "o'brien\"@x.test").unwrap();
        assert!(script.contains(r#"const value = "o'brien\"@x.test";"#));
        assert!(script.contains(r#"{"css":"input[type=\"email\"]"}"#));
        assert!(script.starts_with("(() => {"));
        assert!(script.ends_with("})()"));
    }

    #[test]
    fn select_row_carries_handle_and_checkbox() {
        let script = select_row("3", "input[type=\"checkbox\"]").unwrap();
        assert!(script.contains("const handle = \"3\";"));
        assert!(script.contains("data-mps-row"));
    }

    #[test]
    fn text_selectors_keep_their_text() {
        let script = click_first(&[Selector::with_text("button", "Print")]).unwrap();
        assert!(script.contains(r#""text":"Print""#));
    }
}
