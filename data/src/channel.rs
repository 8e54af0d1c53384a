use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::isupport::{ISupport, ModeKind};
use crate::mode::Mode;
use crate::user;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub setter: Option<String>,
    pub time: Option<DateTime<Utc>>,
}

/// One entry of a list mode such as a ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub mask: String,
    pub setter: Option<String>,
    pub time: Option<DateTime<Utc>>,
}

/// A user's presence in a channel. Prefixes are kept most powerful first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Member {
    pub prefixes: String,
}

impl Member {
    pub fn highest(&self) -> Option<char> {
        self.prefixes.chars().next()
    }

    fn add(&mut self, prefix: char, isupport: &ISupport) {
        if self.prefixes.contains(prefix) {
            return;
        }

        let mut prefixes = self.prefixes.chars().collect::<Vec<_>>();
        prefixes.push(prefix);
        prefixes.sort_by_key(|prefix| isupport.prefix_rank(*prefix).unwrap_or(usize::MAX));
        self.prefixes = prefixes.into_iter().collect();
    }

    fn remove(&mut self, prefix: char) {
        self.prefixes.retain(|c| c != prefix);
    }
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub topic: Option<Topic>,
    pub created: Option<DateTime<Utc>>,
    members: IndexMap<user::Id, Member>,
    flags: BTreeSet<char>,
    parameters: BTreeMap<char, String>,
    list_modes: HashMap<char, Vec<ListEntry>>,
    // Requests the server may refuse with 482, in the order they were sent
    requested: VecDeque<Request>,
    // List modes whose reply batch is in progress
    collecting: HashSet<char>,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            topic: None,
            created: None,
            members: IndexMap::new(),
            flags: BTreeSet::new(),
            parameters: BTreeMap::new(),
            list_modes: HashMap::new(),
            requested: VecDeque::new(),
            collecting: HashSet::new(),
        }
    }

    /// Adds a member, returning false when the user was already present.
    pub fn join(&mut self, id: user::Id) -> bool {
        if self.members.contains_key(&id) {
            return false;
        }
        self.members.insert(id, Member::default());
        true
    }

    pub fn leave(&mut self, id: user::Id) -> Option<Member> {
        self.members.shift_remove(&id)
    }

    pub fn contains(&self, id: user::Id) -> bool {
        self.members.contains_key(&id)
    }

    pub fn member(&self, id: user::Id) -> Option<&Member> {
        self.members.get(&id)
    }

    pub fn members(&self) -> impl Iterator<Item = (user::Id, &Member)> {
        self.members.iter().map(|(id, member)| (*id, member))
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Sets a member's prefixes from a `NAMES` reply, e.g. `@+`.
    pub fn set_prefixes(&mut self, id: user::Id, prefixes: &str, isupport: &ISupport) {
        let member = self.members.entry(id).or_default();
        member.prefixes.clear();

        for prefix in prefixes.chars() {
            member.add(prefix, isupport);
        }
    }

    /// Applies a membership mode such as `+o`. Returns false for non-members.
    pub fn set_membership(
        &mut self,
        id: user::Id,
        mode: &Mode,
        isupport: &ISupport,
    ) -> bool {
        let Some(prefix) = isupport.prefix_for_mode(mode.value()) else {
            return false;
        };
        let Some(member) = self.members.get_mut(&id) else {
            return false;
        };

        match mode {
            Mode::Add(..) => member.add(prefix, isupport),
            Mode::Remove(..) => member.remove(prefix),
        }

        true
    }

    /// Applies a non-membership channel mode.
    pub fn apply_mode(&mut self, mode: &Mode, isupport: &ISupport) {
        let value = mode.value();

        match (isupport.mode_kind(value), mode) {
            (Some(ModeKind::Membership), _) => {}
            (Some(ModeKind::List), Mode::Add(_, Some(mask))) => {
                let entries = self.list_modes.entry(value).or_default();

                if !entries.iter().any(|entry| entry.mask == *mask) {
                    entries.push(ListEntry {
                        mask: mask.clone(),
                        setter: None,
                        time: Some(Utc::now()),
                    });
                }
            }
            (Some(ModeKind::List), Mode::Remove(_, Some(mask))) => {
                if let Some(entries) = self.list_modes.get_mut(&value) {
                    entries.retain(|entry| entry.mask != *mask);
                }
            }
            (Some(ModeKind::List), _) => {}
            (Some(ModeKind::AlwaysParameter | ModeKind::SetParameter), Mode::Add(_, Some(arg))) => {
                self.parameters.insert(value, arg.clone());
            }
            (Some(ModeKind::AlwaysParameter | ModeKind::SetParameter), Mode::Remove(..)) => {
                self.parameters.remove(&value);
            }
            (Some(ModeKind::AlwaysParameter | ModeKind::SetParameter), Mode::Add(_, None)) => {}
            (_, Mode::Add(..)) => {
                self.flags.insert(value);
            }
            (_, Mode::Remove(..)) => {
                self.flags.remove(&value);
            }
        }
    }

    /// Replaces boolean and parameter modes with a `324` snapshot.
    pub fn reset_modes(&mut self, modes: &[Mode], isupport: &ISupport) {
        self.flags.clear();
        self.parameters.clear();

        for mode in modes {
            self.apply_mode(mode, isupport);
        }
    }

    /// The channel's mode string, e.g. `+ntk key`.
    pub fn modes(&self) -> String {
        let letters = self
            .flags
            .iter()
            .chain(self.parameters.keys())
            .collect::<String>();

        if letters.is_empty() {
            return String::new();
        }

        std::iter::once(format!("+{letters}"))
            .chain(self.parameters.values().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_flag(&self, mode: char) -> bool {
        self.flags.contains(&mode)
    }

    pub fn parameter(&self, mode: char) -> Option<&str> {
        self.parameters.get(&mode).map(String::as_str)
    }

    pub fn list(&self, mode: char) -> &[ListEntry] {
        self.list_modes
            .get(&mode)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Records that list `mode` was requested so replies can be attributed.
    pub fn request_list(&mut self, mode: char) {
        self.requested.push_back(Request::List(mode));
    }

    /// Records a KICK, TOPIC or MODE change that needs channel operator.
    pub fn request_operator(&mut self) {
        self.requested.push_back(Request::Operator);
    }

    pub fn pending_lists(&self) -> usize {
        self.requested
            .iter()
            .filter(|request| matches!(request, Request::List(_)))
            .count()
    }

    /// Which list a reply belongs to. Outstanding requests win over the
    /// numeric's usual meaning since some servers reuse ban numerics.
    pub fn list_mode_for(&self, guess: char) -> char {
        self.requested
            .iter()
            .find_map(|request| match request {
                Request::List(mode) => Some(*mode),
                Request::Operator => None,
            })
            .unwrap_or(guess)
    }

    /// Adds an entry from a list reply. The first entry of a batch clears
    /// whatever was known before.
    pub fn list_entry(&mut self, mode: char, entry: ListEntry) {
        let entries = self.list_modes.entry(mode).or_default();

        if self.collecting.insert(mode) {
            entries.clear();
        }

        if !entry.mask.is_empty() {
            entries.push(entry);
        }
    }

    /// Ends a list batch. Returns true once every requested list has arrived.
    pub fn list_end(&mut self, mode: char) -> bool {
        if !self.collecting.remove(&mode) {
            // Empty list
            self.list_modes.entry(mode).or_default().clear();
        }

        // Replies come in request order, so anything sent earlier was answered
        while self.requested.front() == Some(&Request::Operator) {
            self.requested.pop_front();
        }

        if let Some(position) = self
            .requested
            .iter()
            .position(|request| *request == Request::List(mode))
        {
            self.requested.remove(position);
        }

        self.pending_lists() == 0
    }

    /// Our own KICK, TOPIC or MODE change went through.
    pub fn operator_done(&mut self) {
        if let Some(position) = self
            .requested
            .iter()
            .position(|request| *request == Request::Operator)
        {
            self.requested.remove(position);
        }
    }

    /// Drops the oldest request, used when the server refused it.
    pub fn refuse_request(&mut self) -> Option<Request> {
        self.requested.pop_front()
    }
}

/// Something sent to a channel that the server may refuse with 482.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    List(char),
    Operator,
}

#[cfg(test)]
mod test {
    use super::{Channel, ListEntry, Request};
    use crate::isupport::ISupport;
    use crate::mode::{self, Mode};
    use crate::user::Users;

    #[test]
    fn membership_is_unique() {
        let mut users = Users::default();
        let mut channel = Channel::new("#rust");
        let dan = users.resolve_nickname("dan");

        assert!(channel.join(dan));
        assert!(!channel.join(dan));
        assert_eq!(channel.member_count(), 1);

        assert!(channel.leave(dan).is_some());
        assert!(!channel.contains(dan));
    }

    #[test]
    fn prefixes_are_ranked() {
        let isupport = ISupport::default();
        let mut users = Users::default();
        let mut channel = Channel::new("#rust");
        let dan = users.resolve_nickname("dan");

        channel.join(dan);
        assert!(channel.set_membership(dan, &Mode::Add('v', None), &isupport));
        assert!(channel.set_membership(dan, &Mode::Add('o', None), &isupport));
        assert_eq!(channel.member(dan).unwrap().prefixes, "@+");
        assert_eq!(channel.member(dan).unwrap().highest(), Some('@'));

        channel.set_membership(dan, &Mode::Remove('o', None), &isupport);
        assert_eq!(channel.member(dan).unwrap().prefixes, "+");

        let bob = users.resolve_nickname("bob");
        assert!(!channel.set_membership(bob, &Mode::Add('o', None), &isupport));
    }

    #[test]
    fn mode_string() {
        let isupport = ISupport::default();
        let mut channel = Channel::new("#rust");
        let args = ["secret".to_string(), "10".to_string()];

        for mode in mode::parse_channel("+ntkl", &args, &isupport) {
            channel.apply_mode(&mode, &isupport);
        }
        assert_eq!(channel.modes(), "+ntkl secret 10");

        for mode in mode::parse_channel("-lt", &[], &isupport) {
            channel.apply_mode(&mode, &isupport);
        }
        assert_eq!(channel.modes(), "+nk secret");
        assert_eq!(channel.parameter('k'), Some("secret"));
        assert!(!channel.has_flag('t'));
    }

    #[test]
    fn list_batches() {
        let mut channel = Channel::new("#rust");
        let entry = |mask: &str| ListEntry {
            mask: mask.to_string(),
            setter: Some("op".to_string()),
            time: None,
        };

        channel.list_entry('b', entry("stale!*@*"));
        assert!(channel.list_end('b'));

        channel.request_list('b');
        channel.request_list('q');

        let mode = channel.list_mode_for('b');
        channel.list_entry(mode, entry("a!*@*"));
        channel.list_entry(mode, entry("b!*@*"));
        assert!(!channel.list_end(mode));
        assert_eq!(channel.list('b').len(), 2);

        // Quiet list sent with ban numerics
        let mode = channel.list_mode_for('b');
        assert_eq!(mode, 'q');
        assert!(channel.list_end(mode));
        assert!(channel.list('q').is_empty());
        assert_eq!(channel.pending_lists(), 0);
    }

    #[test]
    fn refused_requests() {
        let mut channel = Channel::new("#rust");

        channel.request_operator();
        channel.request_list('e');
        channel.request_operator();
        channel.request_list('I');
        assert_eq!(channel.pending_lists(), 2);

        // The first KICK is refused, the exception list is not
        assert_eq!(channel.refuse_request(), Some(Request::Operator));
        assert_eq!(channel.list_mode_for('b'), 'e');
        assert!(!channel.list_end('e'));

        // The TOPIC went through
        channel.operator_done();
        assert_eq!(channel.refuse_request(), Some(Request::List('I')));
        assert_eq!(channel.pending_lists(), 0);
        assert_eq!(channel.refuse_request(), None);

        // A change that was never echoed is settled by a later list reply
        channel.request_operator();
        channel.request_list('b');
        assert!(channel.list_end('b'));
        assert_eq!(channel.refuse_request(), None);
    }
}
