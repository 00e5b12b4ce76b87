use std::collections::BTreeMap;

/// Handful tool to store SQL source aliases.
/// ```
/// use relata_persistence::sqlite::SourceAlias;
///
/// let aliases = SourceAlias::new(&[("{:user:}", "users"), ("{:wallet:}", "Wallet")]);
/// assert_eq!("users.id = Wallet.user_id", aliases.apply("{:user:}.id = {:wallet:}.user_id"));
/// ```
#[derive(Debug, Default, Clone)]
pub struct SourceAlias {
    /// Internal map of source_name => source_alias
    aliases: BTreeMap<String, String>,
}

impl SourceAlias {
    /// Create a new alias from a `&[(name, alias)]` list
    pub fn new(aliases: &[(&str, &str)]) -> Self {
        Self {
            aliases: aliases
                .iter()
                .map(|(name, alias)| (name.to_string(), alias.to_string()))
                .collect(),
        }
    }

    /// Add an alias, builder style
    pub fn with_alias(mut self, name: &str, alias: &str) -> Self {
        self.aliases.insert(name.to_string(), alias.to_string());
        self
    }

    /// Replace every source name of `text` by its alias
    pub fn apply(&self, text: &str) -> String {
        self.aliases
            .iter()
            .fold(text.to_string(), |text, (name, alias)| text.replace(name, alias))
    }
}
