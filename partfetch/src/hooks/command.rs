//! Hook command templates and placeholder substitution.

use std::collections::BTreeMap;
use std::path::Path;

/// Placeholder replaced with the path of the complete chunk artifact.
pub const PART_PLACEHOLDER: &str = "{part}";

/// Placeholder replaced with the chunk index.
pub const INDEX_PLACEHOLDER: &str = "{idx}";

/// Placeholder replaced with the transfer's name prefix.
pub const BASE_PLACEHOLDER: &str = "{base}";

/// Values substituted into a hook template for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders {
    values: BTreeMap<&'static str, String>,
}

impl Placeholders {
    /// Placeholder map for a completed chunk.
    pub fn for_chunk(part: &Path, index: usize, base: &str) -> Self {
        let mut values = BTreeMap::new();
        values.insert(PART_PLACEHOLDER, part.to_string_lossy().into_owned());
        values.insert(INDEX_PLACEHOLDER, index.to_string());
        values.insert(BASE_PLACEHOLDER, base.to_string());
        Self { values }
    }

    /// Value bound to `placeholder`, if any.
    pub fn get(&self, placeholder: &str) -> Option<&str> {
        self.values.get(placeholder).map(String::as_str)
    }
}

/// A shell command template run once per completed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCommand {
    template: String,
}

impl HookCommand {
    /// Wrap a template. Returns `None` for an empty or blank template.
    pub fn new(template: impl Into<String>) -> Option<Self> {
        let template = template.into();
        if template.trim().is_empty() {
            None
        } else {
            Some(Self { template })
        }
    }

    /// The raw template.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Substitute every placeholder in a single left-to-right pass.
    ///
    /// Substituted values are never rescanned, so a path containing `{idx}`
    /// is passed through literally. Unknown `{...}` sequences are kept.
    pub fn render(&self, placeholders: &Placeholders) -> String {
        let mut rendered = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            rendered.push_str(&rest[..open]);
            let candidate = &rest[open..];

            let matched = candidate
                .find('}')
                .map(|close| &candidate[..=close])
                .and_then(|token| placeholders.get(token).map(|value| (token, value)));

            match matched {
                Some((token, value)) => {
                    rendered.push_str(value);
                    rest = &candidate[token.len()..];
                }
                None => {
                    rendered.push('{');
                    rest = &candidate[1..];
                }
            }
        }
        rendered.push_str(rest);
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholders() -> Placeholders {
        Placeholders::for_chunk(Path::new("/data/file.bin.000003.part"), 3, "file.bin")
    }

    #[test]
    fn test_render_all_placeholders() {
        let command = HookCommand::new("upload {part} --index {idx} --name {base}").unwrap();
        assert_eq!(
            command.render(&placeholders()),
            "upload /data/file.bin.000003.part --index 3 --name file.bin"
        );
    }

    #[test]
    fn test_render_repeated_placeholder() {
        let command = HookCommand::new("{idx}-{idx}").unwrap();
        assert_eq!(command.render(&placeholders()), "3-3");
    }

    #[test]
    fn test_render_keeps_unknown_braces() {
        let command = HookCommand::new("awk '{print $1}' {part} {").unwrap();
        assert_eq!(
            command.render(&placeholders()),
            "awk '{print $1}' /data/file.bin.000003.part {"
        );
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let values = Placeholders::for_chunk(Path::new("/tmp/{idx}.part"), 7, "b");
        let command = HookCommand::new("cat {part}").unwrap();
        assert_eq!(command.render(&values), "cat /tmp/{idx}.part");
    }

    #[test]
    fn test_blank_template_is_rejected() {
        assert!(HookCommand::new("").is_none());
        assert!(HookCommand::new("   ").is_none());
    }
}
