//! Command parser - Splits chat commands into name and arguments

/// A parsed command such as `/acs -g ban 42 shop.buy`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Whether a flag like `-g` was given anywhere
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Arguments that are not flags; `-100` is a value, `-g` a flag
    pub fn positional(&self) -> Vec<&str> {
        self.args
            .iter()
            .filter(|a| !is_flag(a))
            .map(String::as_str)
            .collect()
    }
}

fn is_flag(arg: &str) -> bool {
    match arg.strip_prefix('-') {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphabetic()),
        None => false,
    }
}

/// Parses command text using a configurable prefix
#[derive(Debug, Clone)]
pub struct CommandParser {
    prefix: String,
}

impl CommandParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_command(&self, text: &str) -> bool {
        self.parse(text).is_some()
    }

    /// Parse `text`; `None` if it is not a command
    pub fn parse(&self, text: &str) -> Option<CommandLine> {
        let rest = text.trim_start().strip_prefix(self.prefix.as_str())?;

        // Split command and arguments
        let mut parts = rest.split_whitespace();
        let name = parts.next()?.to_string();
        let args = parts.map(str::to_string).collect();
        Some(CommandLine { name, args })
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        let parser = CommandParser::default();
        let cmd = parser.parse("/acs -g ban 42 shop.buy").unwrap();
        assert_eq!(cmd.name, "acs");
        assert!(cmd.has_flag("-g"));
        assert_eq!(cmd.positional(), vec!["ban", "42", "shop.buy"]);

        let cmd = parser.parse("/acs -g grant -100 shop.buy").unwrap();
        assert_eq!(cmd.positional(), vec!["grant", "-100", "shop.buy"]);
    }

    #[test]
    fn test_not_a_command() {
        let parser = CommandParser::new("!");
        assert!(parser.parse("hello").is_none());
        assert!(parser.parse("!").is_none());
        assert_eq!(parser.parse("!plg").unwrap().args.len(), 0);
    }
}
