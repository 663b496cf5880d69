//! Locator abstraction for element selection.
//!
//! The portal's markup is not under our control and has churned across
//! portal releases: the same control has been reachable by
//! accessibility role, by label, by a fixed element id, and by text,
//! depending on the build. Each UI step therefore declares a
//! [`LocatorChain`]: a priority-ordered list of [`Selector`]s tried in
//! order on every poll tick until one matches or the wait budget is
//! exhausted.
//!
//! Selectors compile to JavaScript expressions evaluated in the page,
//! each yielding the matched element or `null`.

/// One strategy for locating an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Accessibility role plus accessible name (preferred)
    Role {
        /// ARIA role, e.g. "textbox", "button", "link"
        role: String,
        /// Accessible name to match (substring)
        name: String,
    },
    /// Form control located by its label, placeholder or aria-label
    Label(String),
    /// Attribute equality, e.g. `title="Download"`
    Attribute {
        /// Attribute name
        name: String,
        /// Attribute value
        value: String,
    },
    /// Visible text content (exact direct text preferred, substring fallback)
    Text(String),
    /// Raw CSS selector, including fixed element ids
    Css(String),
}

impl Selector {
    /// Role + accessible name selector
    #[must_use]
    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.into(),
        }
    }

    /// Label selector
    #[must_use]
    pub fn label(text: impl Into<String>) -> Self {
        Self::Label(text.into())
    }

    /// Attribute selector
    #[must_use]
    pub fn attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Attribute {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Text selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// JavaScript expression evaluating to the matched element or `null`.
    #[must_use]
    pub fn to_find_js(&self) -> String {
        match self {
            Self::Css(s) => format!("document.querySelector({s:?})"),
            Self::Attribute { name, value } => {
                let css = format!("[{name}={value:?}]");
                format!("document.querySelector({css:?})")
            }
            Self::Role { role, name } => format!(
                r#"(() => {{
                    const roleSelectors = {{
                        textbox: 'input:not([type=checkbox]):not([type=radio]):not([type=submit]):not([type=button]), textarea, [role="textbox"]',
                        button: 'button, input[type=submit], input[type=button], [role="button"]',
                        link: 'a[href], [role="link"]'
                    }};
                    const role = {role:?};
                    const sel = roleSelectors[role] || ('[role=' + JSON.stringify(role) + ']');
                    const accName = el => (el.getAttribute('aria-label')
                        || el.getAttribute('placeholder')
                        || el.getAttribute('title')
                        || el.textContent
                        || '').trim();
                    return Array.from(document.querySelectorAll(sel))
                        .find(el => accName(el).includes({name:?})) || null;
                }})()"#
            ),
            Self::Label(text) => format!(
                r#"(() => {{
                    const wanted = {text:?};
                    for (const label of document.querySelectorAll('label')) {{
                        if (!(label.textContent || '').trim().includes(wanted)) continue;
                        const target = label.htmlFor
                            ? document.getElementById(label.htmlFor)
                            : label.querySelector('input, textarea, select');
                        if (target) return target;
                    }}
                    return Array.from(document.querySelectorAll('input, textarea, select'))
                        .find(el => ((el.getAttribute('aria-label') || '').includes(wanted))
                            || ((el.getAttribute('placeholder') || '').includes(wanted))) || null;
                }})()"#
            ),
            Self::Text(text) => format!(
                r#"(() => {{
                    const wanted = {text:?};
                    const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_ELEMENT);
                    let node;
                    while ((node = walker.nextNode())) {{
                        const direct = Array.from(node.childNodes)
                            .filter(n => n.nodeType === 3)
                            .map(n => n.textContent.trim())
                            .join('');
                        if (direct === wanted) return node;
                    }}
                    return Array.from(document.querySelectorAll('a, button, div, span, li, td'))
                        .find(el => (el.textContent || '').trim().includes(wanted)) || null;
                }})()"#
            ),
        }
    }

    /// JavaScript statement clicking the matched element; evaluates to
    /// `true` when an element was found and clicked.
    #[must_use]
    pub fn to_click_js(&self) -> String {
        let find = self.to_find_js();
        format!(
            r"(() => {{
                const el = {find};
                if (!el) return false;
                el.scrollIntoView({{ block: 'center' }});
                el.click();
                return true;
            }})()"
        )
    }

    /// JavaScript statement focusing the matched element (click + focus,
    /// mirroring a user selecting an input before typing); evaluates to
    /// `true` on success.
    #[must_use]
    pub fn to_focus_js(&self) -> String {
        let find = self.to_find_js();
        format!(
            r"(() => {{
                const el = {find};
                if (!el) return false;
                el.scrollIntoView({{ block: 'center' }});
                el.click();
                el.focus();
                return true;
            }})()"
        )
    }

    /// JavaScript expression evaluating to `true` when an element matches.
    #[must_use]
    pub fn to_exists_js(&self) -> String {
        format!("({}) !== null", self.to_find_js())
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Role { role, name } => write!(f, "role={role} name={name:?}"),
            Self::Label(text) => write!(f, "label={text:?}"),
            Self::Attribute { name, value } => write!(f, "[{name}={value:?}]"),
            Self::Text(text) => write!(f, "text={text:?}"),
            Self::Css(css) => write!(f, "css={css:?}"),
        }
    }
}

/// Priority-ordered fallback list of selectors for one UI step.
#[derive(Debug, Clone)]
pub struct LocatorChain {
    description: String,
    selectors: Vec<Selector>,
}

impl LocatorChain {
    /// Build a chain. `description` names the UI step for logs and errors.
    #[must_use]
    pub fn new(description: impl Into<String>, selectors: Vec<Selector>) -> Self {
        Self {
            description: description.into(),
            selectors,
        }
    }

    /// Human-readable step name
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Selectors in declared priority order
    #[must_use]
    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }
}

impl std::fmt::Display for LocatorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (", self.description)?;
        for (i, sel) in self.selectors.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{sel}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_selector_compiles_to_query_selector() {
        let js = Selector::css("#btn_outerverify").to_find_js();
        assert_eq!(js, "document.querySelector(\"#btn_outerverify\")");
    }

    #[test]
    fn attribute_selector_quotes_the_value() {
        let js = Selector::attribute("title", "Download").to_find_js();
        assert!(js.contains(r#"[title=\"Download\"]"#));
    }

    #[test]
    fn role_selector_embeds_role_and_name() {
        let js = Selector::role("textbox", "Username or email").to_find_js();
        assert!(js.contains("\"textbox\""));
        assert!(js.contains("\"Username or email\""));
        assert!(js.contains("aria-label"));
    }

    #[test]
    fn text_selector_prefers_exact_direct_text() {
        let js = Selector::text("Nautica Shopping Centre").to_find_js();
        assert!(js.contains("createTreeWalker"));
        assert!(js.contains("direct === wanted"));
    }

    #[test]
    fn click_js_reports_whether_anything_matched() {
        let js = Selector::css("button").to_click_js();
        assert!(js.contains("if (!el) return false"));
        assert!(js.contains("el.click()"));
    }

    #[test]
    fn chain_preserves_declared_priority() {
        let chain = LocatorChain::new(
            "login button",
            vec![
                Selector::css("#btn_outerverify"),
                Selector::role("button", "Log In"),
                Selector::text("Log In"),
            ],
        );
        assert_eq!(chain.selectors().len(), 3);
        assert!(matches!(chain.selectors()[0], Selector::Css(_)));
        assert!(matches!(chain.selectors()[2], Selector::Text(_)));
    }

    #[test]
    fn chain_display_names_the_step() {
        let chain = LocatorChain::new("export button", vec![Selector::role("button", "Export")]);
        let text = chain.to_string();
        assert!(text.starts_with("export button"));
        assert!(text.contains("role=button"));
    }
}
