use crate::css::absolutize_urls;

/// Resolve `href` against `base_url`; unparsable input passes through.
pub fn resolve_relative_url(base_url: &str, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }
    let Ok(base) = url::Url::parse(base_url) else {
        return href.to_string();
    };
    match base.join(href) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => href.to_string(),
    }
}

/// Attribute value as it is recorded: URLs made absolute, inline styles
/// rewritten, everything else verbatim.
pub fn transform_attribute(base_url: &str, tag: &str, name: &str, value: &str) -> String {
    match name {
        "src" | "href" if !is_inert_href(tag, value) => resolve_relative_url(base_url, value),
        "srcset" => value
            .split(',')
            .map(|candidate| {
                let candidate = candidate.trim();
                match candidate.split_once(char::is_whitespace) {
                    Some((url, descriptor)) => {
                        format!("{} {}", resolve_relative_url(base_url, url), descriptor.trim())
                    }
                    None => resolve_relative_url(base_url, candidate),
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
        "style" => absolutize_urls(value, base_url),
        _ => value.to_string(),
    }
}

// script: and fragment links keep their literal meaning
fn is_inert_href(tag: &str, value: &str) -> bool {
    let value = value.trim_start();
    value.starts_with('#')
        || (tag == "a" && value.get(..11).is_some_and(|p| p.eq_ignore_ascii_case("javascript:")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_urls() {
        assert_eq!(
            resolve_relative_url("https://a.test/dir/page.html", "img.png"),
            "https://a.test/dir/img.png"
        );
        assert_eq!(
            resolve_relative_url("https://a.test/dir/page.html", "/root.png"),
            "https://a.test/root.png"
        );
        assert_eq!(resolve_relative_url("about:blank", "x.png"), "x.png");
    }

    #[test]
    fn attribute_transform() {
        let base = "https://a.test/dir/page.html";
        assert_eq!(transform_attribute(base, "img", "src", "a.png"), "https://a.test/dir/a.png");
        assert_eq!(transform_attribute(base, "a", "href", "#top"), "#top");
        assert_eq!(
            transform_attribute(base, "div", "style", "background: url(b.png)"),
            "background: url(https://a.test/dir/b.png)"
        );
        assert_eq!(
            transform_attribute(base, "img", "srcset", "a.png 1x, b.png 2x"),
            "https://a.test/dir/a.png 1x, https://a.test/dir/b.png 2x"
        );
        assert_eq!(transform_attribute(base, "div", "title", "x.png"), "x.png");
    }
}
