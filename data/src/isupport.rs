use std::str::FromStr;

use indexmap::IndexMap;

/// Case folding rules advertised by the server's `CASEMAPPING` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Casemapping {
    Ascii,
    #[default]
    Rfc1459,
    StrictRfc1459,
}

impl Casemapping {
    fn fold_char(self, c: char) -> char {
        match (self, c) {
            (_, 'A'..='Z') => c.to_ascii_lowercase(),
            (Casemapping::Ascii, _) => c,
            (_, '[') => '{',
            (_, ']') => '}',
            (_, '\\') => '|',
            (Casemapping::Rfc1459, '~') => '^',
            _ => c,
        }
    }

    pub fn fold(self, value: &str) -> String {
        value.chars().map(|c| self.fold_char(c)).collect()
    }

    pub fn equals(self, a: &str, b: &str) -> bool {
        a.len() == b.len()
            && a
                .chars()
                .zip(b.chars())
                .all(|(a, b)| self.fold_char(a) == self.fold_char(b))
    }
}

#[derive(Debug)]
pub enum Operation {
    Add(Parameter),
    Remove(String),
}

impl FromStr for Operation {
    type Err = &'static str;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        if token.is_empty() {
            return Err("empty ISUPPORT token not allowed");
        }

        if let Some(parameter) = token.strip_prefix('-') {
            return Ok(Operation::Remove(parameter.to_string()));
        }

        let (parameter, value) = match token.split_once('=') {
            Some((parameter, value)) => (parameter, Some(value)),
            None => (token, None),
        };

        match (parameter, value) {
            ("CASEMAPPING", Some(value)) => match value.to_lowercase().as_ref() {
                "ascii" => Ok(Operation::Add(Parameter::CASEMAPPING(Casemapping::Ascii))),
                "rfc1459" => Ok(Operation::Add(Parameter::CASEMAPPING(Casemapping::Rfc1459))),
                "rfc1459-strict" | "strict-rfc1459" => Ok(Operation::Add(
                    Parameter::CASEMAPPING(Casemapping::StrictRfc1459),
                )),
                _ => Err("unknown casemapping"),
            },
            ("CHANMODES", Some(value)) => {
                let mut groups = value.split(',').map(String::from);

                Ok(Operation::Add(Parameter::CHANMODES(ChannelModes {
                    list: groups.next().unwrap_or_default(),
                    always: groups.next().unwrap_or_default(),
                    set: groups.next().unwrap_or_default(),
                    flag: groups.next().unwrap_or_default(),
                })))
            }
            ("CHANTYPES", value) => Ok(Operation::Add(Parameter::CHANTYPES(
                value.unwrap_or_default().to_string(),
            ))),
            ("LINELEN", Some(value)) => Ok(Operation::Add(Parameter::LINELEN(
                parse_required_positive_integer(value)?,
            ))),
            ("MAXBANS", Some(value)) => Ok(Operation::Add(Parameter::MAXBANS(
                parse_required_positive_integer(value)?,
            ))),
            ("MAXLIST", Some(value)) => {
                let modes_limits = value
                    .split(',')
                    .filter_map(|modes_limit| {
                        let (modes, limit) = modes_limit.split_once(':')?;
                        let limit = limit.parse::<u16>().ok()?;

                        Some(ModesLimit {
                            modes: modes.to_string(),
                            limit,
                        })
                    })
                    .collect::<Vec<_>>();

                if modes_limits.is_empty() {
                    Err("no valid modes limits")
                } else {
                    Ok(Operation::Add(Parameter::MAXLIST(modes_limits)))
                }
            }
            ("NETWORK", Some(value)) => Ok(Operation::Add(Parameter::NETWORK(value.to_string()))),
            ("PREFIX", None) => Ok(Operation::Add(Parameter::PREFIX(vec![]))),
            ("PREFIX", Some(value)) => {
                if value.is_empty() {
                    return Ok(Operation::Add(Parameter::PREFIX(vec![])));
                }

                let Some((modes, prefixes)) = value.split_once(')') else {
                    return Err("unrecognized PREFIX format");
                };

                Ok(Operation::Add(Parameter::PREFIX(
                    modes
                        .chars()
                        .skip(1)
                        .zip(prefixes.chars())
                        .map(|(mode, prefix)| PrefixMap { mode, prefix })
                        .collect(),
                )))
            }
            ("CASEMAPPING" | "CHANMODES" | "LINELEN" | "MAXBANS" | "MAXLIST" | "NETWORK", None) => {
                Err("value required")
            }
            (parameter, value) => Ok(Operation::Add(Parameter::Other(
                parameter.to_string(),
                value.map(ToString::to_string),
            ))),
        }
    }
}

// ISUPPORT Parameter References
// - https://defs.ircdocs.horse/defs/isupport.html
// - https://modern.ircdocs.horse/#rplisupport-005
#[allow(non_camel_case_types)]
#[derive(Clone, Debug)]
pub enum Parameter {
    CASEMAPPING(Casemapping),
    CHANMODES(ChannelModes),
    CHANTYPES(String),
    LINELEN(u16),
    MAXBANS(u16),
    MAXLIST(Vec<ModesLimit>),
    NETWORK(String),
    PREFIX(Vec<PrefixMap>),
    Other(String, Option<String>),
}

/// The four `CHANMODES` groups: list modes, modes that always take a
/// parameter, modes that take one only when set, and plain flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelModes {
    pub list: String,
    pub always: String,
    pub set: String,
    pub flag: String,
}

impl Default for ChannelModes {
    fn default() -> Self {
        Self {
            list: "beI".to_string(),
            always: "k".to_string(),
            set: "l".to_string(),
            flag: "imnpst".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModesLimit {
    pub modes: String,
    pub limit: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrefixMap {
    pub mode: char,
    pub prefix: char,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeKind {
    List,
    AlwaysParameter,
    SetParameter,
    Flag,
    Membership,
}

/// What the server told us about itself in `005`.
#[derive(Clone, Debug)]
pub struct ISupport {
    pub casemapping: Casemapping,
    pub chanmodes: ChannelModes,
    pub chantypes: String,
    pub linelen: usize,
    pub maxbans: Option<u16>,
    pub maxlist: Vec<ModesLimit>,
    pub network: Option<String>,
    pub prefix: Vec<PrefixMap>,
    tokens: IndexMap<String, Option<String>>,
}

impl Default for ISupport {
    fn default() -> Self {
        Self {
            casemapping: Casemapping::default(),
            chanmodes: ChannelModes::default(),
            chantypes: DEFAULT_CHANTYPES.to_string(),
            linelen: DEFAULT_LINELEN,
            maxbans: None,
            maxlist: vec![],
            network: None,
            prefix: default_prefix(),
            tokens: IndexMap::new(),
        }
    }
}

impl ISupport {
    /// Applies a single `005` token such as `PREFIX=(ov)@+` or `-EXCEPTS`.
    pub fn apply(&mut self, token: &str) -> Result<(), &'static str> {
        let operation = token.parse::<Operation>()?;

        match operation {
            Operation::Add(parameter) => {
                let (name, value) = token
                    .split_once('=')
                    .map_or((token, None), |(name, value)| (name, Some(value)));
                self.tokens
                    .insert(name.to_string(), value.map(ToString::to_string));

                match parameter {
                    Parameter::CASEMAPPING(casemapping) => self.casemapping = casemapping,
                    Parameter::CHANMODES(chanmodes) => self.chanmodes = chanmodes,
                    Parameter::CHANTYPES(chantypes) => self.chantypes = chantypes,
                    Parameter::LINELEN(linelen) => self.linelen = usize::from(linelen),
                    Parameter::MAXBANS(maxbans) => self.maxbans = Some(maxbans),
                    Parameter::MAXLIST(maxlist) => self.maxlist = maxlist,
                    Parameter::NETWORK(network) => self.network = Some(network),
                    Parameter::PREFIX(prefix) => self.prefix = prefix,
                    Parameter::Other(..) => {}
                }
            }
            Operation::Remove(name) => {
                self.tokens.shift_remove(&name);

                match name.as_str() {
                    "CASEMAPPING" => self.casemapping = Casemapping::default(),
                    "CHANMODES" => self.chanmodes = ChannelModes::default(),
                    "CHANTYPES" => self.chantypes = DEFAULT_CHANTYPES.to_string(),
                    "LINELEN" => self.linelen = DEFAULT_LINELEN,
                    "MAXBANS" => self.maxbans = None,
                    "MAXLIST" => self.maxlist.clear(),
                    "NETWORK" => self.network = None,
                    "PREFIX" => self.prefix = default_prefix(),
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Raw value of any advertised token. `Some(None)` means present without a value.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.tokens.get(name).map(Option::as_deref)
    }

    pub fn fold(&self, value: &str) -> String {
        self.casemapping.fold(value)
    }

    pub fn is_channel(&self, target: &str) -> bool {
        target
            .chars()
            .next()
            .is_some_and(|c| self.chantypes.contains(c))
    }

    pub fn mode_kind(&self, mode: char) -> Option<ModeKind> {
        if self.prefix.iter().any(|map| map.mode == mode) {
            Some(ModeKind::Membership)
        } else if self.chanmodes.list.contains(mode) {
            Some(ModeKind::List)
        } else if self.chanmodes.always.contains(mode) {
            Some(ModeKind::AlwaysParameter)
        } else if self.chanmodes.set.contains(mode) {
            Some(ModeKind::SetParameter)
        } else if self.chanmodes.flag.contains(mode) {
            Some(ModeKind::Flag)
        } else {
            None
        }
    }

    pub fn prefix_for_mode(&self, mode: char) -> Option<char> {
        self.prefix
            .iter()
            .find(|map| map.mode == mode)
            .map(|map| map.prefix)
    }

    pub fn mode_for_prefix(&self, prefix: char) -> Option<char> {
        self.prefix
            .iter()
            .find(|map| map.prefix == prefix)
            .map(|map| map.mode)
    }

    /// Rank of a membership prefix, lower is more powerful.
    pub fn prefix_rank(&self, prefix: char) -> Option<usize> {
        self.prefix.iter().position(|map| map.prefix == prefix)
    }

    /// Limit on entries for a list mode, from `MAXLIST` or else `MAXBANS`.
    pub fn max_list(&self, mode: char) -> Option<u16> {
        self.maxlist
            .iter()
            .find(|limit| limit.modes.contains(mode))
            .map(|limit| limit.limit)
            .or(self.maxbans)
    }
}

const DEFAULT_CHANTYPES: &str = "#&";

/// Most IRC servers limit messages to 512 bytes in length, including the trailing CR-LF characters.
pub const DEFAULT_LINELEN: usize = irc::proto::format::BYTE_LIMIT;

fn default_prefix() -> Vec<PrefixMap> {
    vec![
        PrefixMap {
            mode: 'o',
            prefix: '@',
        },
        PrefixMap {
            mode: 'v',
            prefix: '+',
        },
    ]
}

fn parse_required_positive_integer(value: &str) -> Result<u16, &'static str> {
    if let Ok(value) = value.parse::<u16>() {
        Ok(value)
    } else {
        Err("value required to be a positive integer")
    }
}

#[cfg(test)]
mod test {
    use super::{Casemapping, ISupport, ModeKind};

    #[test]
    fn casemapping() {
        let tests = [
            (Casemapping::Ascii, "Nick[]^~", "nick[]^~"),
            (Casemapping::Rfc1459, "Nick[]\\~", "nick{}|^"),
            (Casemapping::StrictRfc1459, "Nick[]\\~", "nick{}|~"),
        ];

        for (casemapping, input, expected) in tests {
            assert_eq!(casemapping.fold(input), expected);
        }

        assert!(Casemapping::Rfc1459.equals("#Foo[1]", "#foo{1}"));
        assert!(!Casemapping::Ascii.equals("#Foo[1]", "#foo{1}"));
    }

    #[test]
    fn apply_tokens() {
        let mut isupport = ISupport::default();

        for token in [
            "PREFIX=(qaohv)~&@%+",
            "CHANMODES=beI,k,l,imnpstS",
            "CHANTYPES=#",
            "CASEMAPPING=ascii",
            "NETWORK=Example",
            "LINELEN=1024",
            "MAXLIST=bq:100,eI:50",
            "SAFELIST",
        ] {
            isupport.apply(token).unwrap();
        }

        assert_eq!(isupport.prefix_for_mode('h'), Some('%'));
        assert_eq!(isupport.mode_for_prefix('~'), Some('q'));
        assert_eq!(isupport.prefix_rank('@'), Some(2));
        assert_eq!(isupport.mode_kind('S'), Some(ModeKind::Flag));
        assert_eq!(isupport.mode_kind('b'), Some(ModeKind::List));
        assert_eq!(isupport.mode_kind('k'), Some(ModeKind::AlwaysParameter));
        assert_eq!(isupport.mode_kind('l'), Some(ModeKind::SetParameter));
        assert_eq!(isupport.mode_kind('o'), Some(ModeKind::Membership));
        assert_eq!(isupport.mode_kind('Z'), None);
        assert!(isupport.is_channel("#rust"));
        assert!(!isupport.is_channel("&local"));
        assert_eq!(isupport.casemapping, Casemapping::Ascii);
        assert_eq!(isupport.network.as_deref(), Some("Example"));
        assert_eq!(isupport.linelen, 1024);
        assert_eq!(isupport.max_list('I'), Some(50));
        assert_eq!(isupport.get("SAFELIST"), Some(None));

        isupport.apply("-LINELEN").unwrap();
        isupport.apply("-SAFELIST").unwrap();
        assert_eq!(isupport.linelen, 512);
        assert_eq!(isupport.get("SAFELIST"), None);
    }

    #[test]
    fn invalid_tokens() {
        let mut isupport = ISupport::default();

        assert!(isupport.apply("").is_err());
        assert!(isupport.apply("LINELEN=abc").is_err());
        assert!(isupport.apply("PREFIX=ov@+").is_err());
        assert!(isupport.apply("CASEMAPPING=klingon").is_err());
        assert_eq!(isupport.linelen, 512);
    }
}
