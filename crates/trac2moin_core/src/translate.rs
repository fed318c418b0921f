use anyhow::{Context, Result};
use regex::Regex;

use crate::identmap::IdentifierMap;

/// Regions the bare-name stages never touch: preformatted blocks, finished
/// links, and destination macros.
const PROTECTED_PATTERN: &str =
    r"(?s)\{\{\{.*?\}\}\}|\[\[[^\]\n]*\]\]|\{\{[^}\n]*\}\}|<<[^>\n]*>>";

/// Source link forms rewritten into `[[target|label]]`.
const LINK_RULES: &[(&str, &str)] = &[
    (r"\[wiki:([^\] |]+) ([^\]]+)\]", "[[${1}|${2}]]"),
    (r"\[wiki:([^\] |]+)\]", "[[${1}]]"),
    (r"\[(https?://[^\] |]+) ([^\]]+)\]", "[[${1}|${2}]]"),
    (r"\[(#[^\] |]+) ([^\]]+)\]", "[[${1}|${2}]]"),
];

/// Macro substitutions that do not depend on the name map.
const MACRO_RULES: &[(&str, &str)] = &[
    (r"\[\[Image\(([^\\)]+)\)\]\]", "{{attachment:${1}}}"),
    (r"\[\[PageOutline\]\]", "<<TableOfContents>>"),
    (
        r"\[\[PageOutline\(\s*([0-9]+)[^)]*\)\]\]",
        "<<TableOfContents(${1})>>",
    ),
    (r"\[\[BR\]\]", "<<BR>>"),
    (r"\[\[TracNav\(([^)]+)\)\]\]", "<<Include(${1})>>"),
];

#[derive(Debug)]
struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("failed to compile rewrite pattern `{pattern}`"))?;
        Ok(Self {
            pattern,
            replacement: replacement.into(),
        })
    }

    fn apply(&self, content: &str) -> String {
        self.pattern
            .replace_all(content, self.replacement.as_str())
            .into_owned()
    }
}

#[derive(Debug)]
enum Stage {
    Rewrite(RewriteRule),
    /// Replace free-standing occurrences of `name` outside protected regions.
    BareName { name: String, replacement: String },
}

/// Ordered rewrite pipeline from Trac markup to MoinMoin markup.
#[derive(Debug)]
pub struct Translator {
    stages: Vec<Stage>,
    protected: Regex,
}

impl Translator {
    pub fn new(page_map: &IdentifierMap, prefix: &str) -> Result<Self> {
        let mut stages = Vec::new();
        for (pattern, replacement) in LINK_RULES {
            stages.push(Stage::Rewrite(RewriteRule::new(pattern, *replacement)?));
        }
        for (old, new) in page_map.renames() {
            push_rename_stages(&mut stages, old, &format!("{prefix}{new}"))?;
        }
        for (pattern, replacement) in MACRO_RULES {
            stages.push(Stage::Rewrite(RewriteRule::new(pattern, *replacement)?));
        }

        let protected =
            Regex::new(PROTECTED_PATTERN).context("failed to compile protected-region pattern")?;
        Ok(Self { stages, protected })
    }

    pub fn translate(&self, content: &str) -> String {
        let mut content = content.to_string();
        for stage in &self.stages {
            content = match stage {
                Stage::Rewrite(rule) => rule.apply(&content),
                Stage::BareName { name, replacement } => self
                    .rewrite_unprotected(&content, |segment| {
                        replace_bare(segment, name, replacement)
                    }),
            };
        }
        content
    }

    fn rewrite_unprotected(&self, content: &str, rewrite: impl Fn(&str) -> String) -> String {
        let mut out = String::with_capacity(content.len());
        let mut last = 0;
        for found in self.protected.find_iter(content) {
            out.push_str(&rewrite(&content[last..found.start()]));
            out.push_str(found.as_str());
            last = found.end();
        }
        out.push_str(&rewrite(&content[last..]));
        out
    }
}

/// Translate a single document. Prefer building one [`Translator`] per run.
pub fn translate_markup(content: &str, page_map: &IdentifierMap, prefix: &str) -> Result<String> {
    Ok(Translator::new(page_map, prefix)?.translate(content))
}

fn push_rename_stages(stages: &mut Vec<Stage>, old: &str, dest: &str) -> Result<()> {
    let old_pattern = regex::escape(old);
    let old_text = escape_replacement(old);
    let dest_text = escape_replacement(dest);

    stages.push(Stage::Rewrite(RewriteRule::new(
        &format!(r"\[\[{old_pattern}(#[A-Za-z0-9_]+)?\]\]"),
        format!("[[{dest_text}${{1}}|{old_text}]]"),
    )?));
    stages.push(Stage::Rewrite(RewriteRule::new(
        &format!(r"\[\[{old_pattern}(#[A-Za-z0-9_]+)?\|([^\]]+)\]\]"),
        format!("[[{dest_text}${{1}}|${{2}}]]"),
    )?));

    if old.contains('/') || looks_like_camel_case(old) {
        stages.push(Stage::BareName {
            name: old.to_string(),
            replacement: dest.to_string(),
        });
    }
    if dest.contains('/') {
        stages.push(Stage::BareName {
            name: dest.to_string(),
            replacement: format!("[[{dest}|{}]]", pretty_label(old)),
        });
    }

    stages.push(Stage::Rewrite(RewriteRule::new(
        &format!(r"(\[(?:TracNav|TracInclude|Include)\(){old_pattern}\)\]"),
        format!("${{1}}{dest_text})]"),
    )?));
    Ok(())
}

/// Display form of a page name: `Foo/BarBaz` becomes `Foo → Bar Baz`.
pub fn pretty_label(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 8);
    let mut previous: Option<char> = None;
    for ch in name.chars() {
        if ch == '/' {
            out.push_str(" → ");
            previous = Some(' ');
            continue;
        }
        if ch.is_uppercase() && previous.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
            out.push(' ');
        }
        out.push(ch);
        previous = Some(ch);
    }
    out.trim().to_string()
}

/// `[A-Z][a-z]+[A-Z]` at the start of the name.
pub fn looks_like_camel_case(name: &str) -> bool {
    let mut chars = name.chars();
    if !chars.next().is_some_and(|ch| ch.is_ascii_uppercase()) {
        return false;
    }
    let mut lowercase = 0usize;
    for ch in chars {
        if ch.is_ascii_lowercase() {
            lowercase += 1;
            continue;
        }
        return lowercase > 0 && ch.is_ascii_uppercase();
    }
    false
}

fn replace_bare(text: &str, name: &str, replacement: &str) -> String {
    if name.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in text.match_indices(name) {
        let end = start + name.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        // `!CamelCase` is Trac's escape for auto-linking.
        if before.is_some_and(|ch| is_name_char(ch) || ch == '!') || after.is_some_and(is_name_char)
        {
            continue;
        }
        out.push_str(&text[last..start]);
        out.push_str(replacement);
        last = end;
    }
    out.push_str(&text[last..]);
    out
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '/'
}

fn escape_replacement(value: &str) -> String {
    value.replace('$', "$$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identmap::parse_identifier_map;

    fn translate_with(content: &str, map: &str, prefix: &str) -> String {
        let map = parse_identifier_map(map, "names.txt").expect("parse map");
        translate_markup(content, &map, prefix).expect("translate")
    }

    fn translate_plain(content: &str) -> String {
        translate_with(content, "", "")
    }

    #[test]
    fn wiki_links_become_double_bracket_links() {
        assert_eq!(translate_plain("[wiki:Foo label]"), "[[Foo|label]]");
        assert_eq!(translate_plain("[wiki:Foo]"), "[[Foo]]");
        assert_eq!(
            translate_plain("see [wiki:Foo/Bar the bar page] here"),
            "see [[Foo/Bar|the bar page]] here"
        );
    }

    #[test]
    fn external_and_anchor_links_keep_labels() {
        assert_eq!(
            translate_plain("[https://example.org/a?b=c Example site]"),
            "[[https://example.org/a?b=c|Example site]]"
        );
        assert_eq!(
            translate_plain("[http://example.org docs]"),
            "[[http://example.org|docs]]"
        );
        assert_eq!(translate_plain("[#install Install]"), "[[#install|Install]]");
    }

    #[test]
    fn mapped_link_keeps_old_name_as_label() {
        assert_eq!(
            translate_with("[[OldPage]]", "OldPage|NewPage\n", "Wiki/"),
            "[[Wiki/NewPage|OldPage]]"
        );
    }

    #[test]
    fn mapped_link_variants() {
        let map = "OldPage|NewPage\n";
        assert_eq!(
            translate_with("[[OldPage|read this]]", map, "Wiki/"),
            "[[Wiki/NewPage|read this]]"
        );
        assert_eq!(
            translate_with("[[OldPage#Intro]]", map, "Wiki/"),
            "[[Wiki/NewPage#Intro|OldPage]]"
        );
        assert_eq!(
            translate_with("[[OldPage#Intro|intro]]", map, "Wiki/"),
            "[[Wiki/NewPage#Intro|intro]]"
        );
        assert_eq!(
            translate_with("[wiki:OldPage docs]", map, ""),
            "[[NewPage|docs]]"
        );
    }

    #[test]
    fn bare_camel_case_names_are_renamed() {
        let map = "OldPage|NewPage\n";
        assert_eq!(
            translate_with("See OldPage now.", map, ""),
            "See NewPage now."
        );
        assert_eq!(translate_with("OldPage", map, ""), "NewPage");
        assert_eq!(
            translate_with("OldPages and MyOldPage", map, ""),
            "OldPages and MyOldPage"
        );
        assert_eq!(translate_with("!OldPage", map, ""), "!OldPage");
    }

    #[test]
    fn bare_names_inside_preformatted_blocks_are_left_alone() {
        let input = "{{{\nOldPage\n}}}\nOldPage";
        assert_eq!(
            translate_with(input, "OldPage|NewPage\n", ""),
            "{{{\nOldPage\n}}}\nNewPage"
        );
    }

    #[test]
    fn plain_words_are_not_auto_links() {
        assert_eq!(
            translate_with("the Sandbox page", "Sandbox|Playground\n", ""),
            "the Sandbox page"
        );
        assert_eq!(
            translate_with("[[Sandbox]]", "Sandbox|Playground\n", ""),
            "[[Playground|Sandbox]]"
        );
    }

    #[test]
    fn path_destinations_get_pretty_links() {
        assert_eq!(
            translate_with("See OldPage.", "OldPage|Docs/NewPage\n", ""),
            "See [[Docs/NewPage|Old Page]]."
        );
        assert_eq!(
            translate_with("See Team/RoadMap.", "Team/RoadMap|RoadMap\n", "Wiki/"),
            "See [[Wiki/RoadMap|Team → Road Map]]."
        );
    }

    #[test]
    fn destination_macros_and_embeds_are_left_alone() {
        let map = "OldPage|NewPage\n";
        assert_eq!(
            translate_with("<<Include(OldPage)>> OldPage", map, "Wiki/"),
            "<<Include(OldPage)>> [[Wiki/NewPage|Old Page]]"
        );
        assert_eq!(
            translate_with("{{attachment:OldPage}} OldPage", map, "Wiki/"),
            "{{attachment:OldPage}} [[Wiki/NewPage|Old Page]]"
        );
    }

    #[test]
    fn include_macros_follow_renames() {
        let map = "OldPage|NewPage\n";
        assert_eq!(
            translate_with("[[TracNav(OldPage)]]", map, "Wiki/"),
            "<<Include(Wiki/NewPage)>>"
        );
        assert_eq!(
            translate_with("[[Include(OldPage)]]", map, ""),
            "[[Include(NewPage)]]"
        );
    }

    #[test]
    fn macros_are_translated() {
        assert_eq!(
            translate_plain("[[Image(diagram.png)]]"),
            "{{attachment:diagram.png}}"
        );
        assert_eq!(translate_plain("[[PageOutline]]"), "<<TableOfContents>>");
        assert_eq!(
            translate_plain("[[PageOutline(2-5)]]"),
            "<<TableOfContents(2)>>"
        );
        assert_eq!(
            translate_plain("[[PageOutline(3)]]"),
            "<<TableOfContents(3)>>"
        );
        assert_eq!(
            translate_plain("[[PageOutline(2,Contents)]]"),
            "<<TableOfContents(2)>>"
        );
        assert_eq!(translate_plain("line[[BR]]break"), "line<<BR>>break");
        assert_eq!(
            translate_plain("[[TracNav(TOC)]]"),
            "<<Include(TOC)>>"
        );
    }

    #[test]
    fn replacement_text_is_literal() {
        assert_eq!(
            translate_with("[[OldPage]]", "OldPage|Price$1\n", ""),
            "[[Price$1|OldPage]]"
        );
    }

    #[test]
    fn translation_is_idempotent() {
        let map = parse_identifier_map("OldPage|NewPage\nWikiStart|FrontPage\n", "names.txt")
            .expect("parse map");
        let translator = Translator::new(&map, "Wiki/").expect("translator");
        let input = "= Title =\n[[PageOutline(2-5)]]\n[wiki:OldPage] and OldPage, \
                     [http://example.org/x some site] [[Image(a.png)]]\nBack to WikiStart.";
        let once = translator.translate(input);
        let twice = translator.translate(&once);
        assert_eq!(once, twice);
        assert!(once.contains("[[Wiki/NewPage|OldPage]]"));
        assert!(once.contains("[[Wiki/NewPage|Old Page]]"));
        assert!(once.contains("[[Wiki/FrontPage|Wiki Start]]"));
        assert!(once.contains("[[http://example.org/x|some site]]"));
    }

    #[test]
    fn pretty_label_splits_humps_and_paths() {
        assert_eq!(pretty_label("WikiStart"), "Wiki Start");
        assert_eq!(pretty_label("Foo/BarBaz"), "Foo → Bar Baz");
        assert_eq!(pretty_label("lowercase"), "lowercase");
        assert_eq!(pretty_label("Release2Notes"), "Release2 Notes");
    }

    #[test]
    fn camel_case_detection() {
        assert!(looks_like_camel_case("WikiStart"));
        assert!(looks_like_camel_case("OldPage/Sub"));
        assert!(!looks_like_camel_case("Sandbox"));
        assert!(!looks_like_camel_case("HTMLPage"));
        assert!(!looks_like_camel_case("wikiStart"));
    }
}
