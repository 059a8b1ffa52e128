//! Startup seeding of configured accounts

use tracing::{info, warn};

use taskdeck_core::{Database, User, UserRepository};
use taskdeck_net::TokenTable;

use crate::config::SeedUser;
use crate::error::Result;

/// Make sure every configured user exists and map their tokens
///
/// Existing accounts are matched by email. A role that differs from the
/// config is brought in line with it.
pub fn seed_users(db: &Database, seeds: &[SeedUser]) -> Result<TokenTable> {
    let mut tokens = TokenTable::new();

    for seed in seeds {
        let user = match db.find_user_by_email(&seed.email)? {
            Some(existing) if existing.role != seed.role => {
                warn!(email = %seed.email, from = %existing.role, to = %seed.role, "Updating seeded role");
                db.update_user_role(existing.id, seed.role)?.unwrap_or(existing)
            }
            Some(existing) => existing,
            None => {
                let user = User::new(seed.name.clone(), seed.email.clone(), seed.role);
                db.create_user(&user)?;
                info!(email = %seed.email, role = %seed.role, "Created seeded user");
                user
            }
        };
        tokens.insert(seed.token.clone(), user.id);
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskdeck_core::Role;
    use taskdeck_net::Authenticator;

    fn seed(name: &str, role: Role, token: &str) -> SeedUser {
        SeedUser {
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            role,
            token: token.into(),
        }
    }

    #[test]
    fn test_seed_creates_users_and_tokens() {
        let db = Database::open_in_memory().unwrap();
        let tokens = seed_users(&db, &[seed("Ada", Role::Admin, "a"), seed("Eve", Role::Employee, "e")]).unwrap();

        assert_eq!(tokens.len(), 2);
        let ada = db.find_user_by_email("ada@example.com").unwrap().unwrap();
        assert_eq!(ada.role, Role::Admin);
        assert_eq!(tokens.authenticate("a"), Some(ada.id));
    }

    #[test]
    fn test_reseeding_keeps_ids_and_syncs_role() {
        let db = Database::open_in_memory().unwrap();
        let first = seed_users(&db, &[seed("Eve", Role::Employee, "old")]).unwrap();
        let id = first.authenticate("old").unwrap();

        let second = seed_users(&db, &[seed("Eve", Role::Admin, "new")]).unwrap();

        assert_eq!(second.authenticate("new"), Some(id));
        assert_eq!(second.authenticate("old"), None);
        assert_eq!(db.list_users().unwrap().len(), 1);
        assert_eq!(db.find_user_by_id(id).unwrap().unwrap().role, Role::Admin);
    }
}
