use fsio_core::Location;

const PERSONAL: &str = "personal";
const DRIVES: &str = "drives";
const DOMAINS: &str = "domains";
const USERS: &str = "users";
const FILES: &str = "files";

/// One source of the federated namespace.
///
/// - `personal/files/...`
/// - `drives/<drive name>/files/...`
/// - `domains/<domain>/users/<email>/files/...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Scope {
    Personal,
    SharedDrive(String),
    DomainUser { domain: String, user: String },
}

impl Scope {
    pub(crate) fn prefix(&self) -> Vec<String> {
        match self {
            Scope::Personal => vec![PERSONAL.into(), FILES.into()],
            Scope::SharedDrive(name) => vec![DRIVES.into(), name.clone(), FILES.into()],
            Scope::DomainUser { domain, user } => vec![
                DOMAINS.into(),
                domain.clone(),
                USERS.into(),
                user.clone(),
                FILES.into(),
            ],
        }
    }

    /// Full location of `relative` inside this scope.
    pub(crate) fn join(&self, relative: &Location) -> Location {
        relative.prefixed(self.prefix())
    }

    /// Split a federated location into its scope and the path inside it.
    /// Locations naming a scope but no file inside it yield `None`.
    pub(crate) fn split(location: &Location) -> Option<(Scope, Location)> {
        let s = location.segments();
        let (scope, consumed) = match s {
            [p, f, ..] if p == PERSONAL && f == FILES => (Scope::Personal, 2),
            [d, name, f, ..] if d == DRIVES && f == FILES => (Scope::SharedDrive(name.clone()), 3),
            [d, domain, u, user, f, ..] if d == DOMAINS && u == USERS && f == FILES => (
                Scope::DomainUser {
                    domain: domain.clone(),
                    user: user.clone(),
                },
                5,
            ),
            _ => return None,
        };
        let relative = location.strip_prefix(consumed)?;
        Some((scope, relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(key: &str) -> Location {
        Location::parse(key).unwrap()
    }

    #[test]
    fn test_split_each_scope() {
        assert_eq!(
            Scope::split(&loc("personal/files/a/b.txt")),
            Some((Scope::Personal, loc("a/b.txt")))
        );
        assert_eq!(
            Scope::split(&loc("drives/Team/files/x")),
            Some((Scope::SharedDrive("Team".into()), loc("x")))
        );
        assert_eq!(
            Scope::split(&loc("domains/example.com/users/ana@example.com/files/doc")),
            Some((
                Scope::DomainUser {
                    domain: "example.com".into(),
                    user: "ana@example.com".into(),
                },
                loc("doc")
            ))
        );
    }

    #[test]
    fn test_split_rejects_other_shapes() {
        assert_eq!(Scope::split(&loc("personal/files")), None);
        assert_eq!(Scope::split(&loc("personal/other/x")), None);
        assert_eq!(Scope::split(&loc("drives/Team/x")), None);
        assert_eq!(Scope::split(&loc("domains/d/people/u/files/x")), None);
        assert_eq!(Scope::split(&loc("elsewhere/files/x")), None);
    }

    #[test]
    fn test_join_inverts_split() {
        let full = loc("drives/Team Drive/files/reports/q1.xlsx");
        let (scope, relative) = Scope::split(&full).unwrap();
        assert_eq!(scope.join(&relative), full);
    }
}
