use rusqlite::{Connection, Row};
use tracing::info;
use uuid::Uuid;

use tradehall_types::models::{Profile, Role, User, UserSummary};

use crate::models::CredentialsRow;
use crate::{Database, OptionalExt, StoreError, StoreResult};
use crate::{friends, get_parsed, get_ts, get_uuid, now, ts};

const USER_COLUMNS: &str = "id, email, username, role, online, created_at";

impl Database {
    pub fn create_user(
        &self,
        id: Uuid,
        email: &str,
        username: &str,
        password_hash: &str,
    ) -> StoreResult<User> {
        let email = normalize_email(email)?;
        let username = validate_username(username)?;

        self.with_tx(|tx| {
            if query_user_by_email(tx, &email)?.is_some() {
                return Err(StoreError::Conflict("email already registered".into()));
            }
            if query_user_by_username(tx, &username)?.is_some() {
                return Err(StoreError::Conflict("username taken".into()));
            }

            let created_at = now();
            tx.execute(
                "INSERT INTO users (id, email, username, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id.to_string(), &email, &username, password_hash, ts(&created_at)),
            )?;

            Ok(User {
                id,
                email,
                username,
                role: Role::User,
                online: false,
                created_at,
            })
        })
    }

    pub fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_credentials_by_email(&self, email: &str) -> StoreResult<Option<CredentialsRow>> {
        let email = email.trim().to_lowercase();
        self.with_conn(|conn| {
            query_credentials(conn, "SELECT id, email, username, role, online, created_at, password, token_version FROM users WHERE email = ?1", &email)
        })
    }

    pub fn get_credentials(&self, id: Uuid) -> StoreResult<Option<CredentialsRow>> {
        self.with_conn(|conn| {
            query_credentials(conn, "SELECT id, email, username, role, online, created_at, password, token_version FROM users WHERE id = ?1", &id.to_string())
        })
    }

    /// Looks a user up by e-mail when the identifier contains `@`, by username otherwise.
    pub fn find_user(&self, identifier: &str) -> StoreResult<Option<User>> {
        self.with_conn(|conn| find_user_by_identifier(conn, identifier))
    }

    /// Current token version and username, for checking a presented token.
    pub fn token_identity(&self, id: Uuid) -> StoreResult<Option<(i64, String)>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT token_version, username FROM users WHERE id = ?1",
                    [id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })
    }

    /// Invalidates every token issued so far. Returns the new version.
    pub fn bump_token_version(&self, id: Uuid) -> StoreResult<i64> {
        self.with_tx(|tx| bump_version(tx, id))
    }

    /// Stores a new password hash and revokes outstanding tokens.
    pub fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<i64> {
        self.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                (password_hash, id.to_string()),
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound("user"));
            }
            bump_version(tx, id)
        })
    }

    pub fn update_username(&self, id: Uuid, username: &str) -> StoreResult<User> {
        let username = validate_username(username)?;

        self.with_tx(|tx| {
            if let Some(existing) = query_user_by_username(tx, &username)? {
                if existing.id != id {
                    return Err(StoreError::Conflict("username taken".into()));
                }
            }
            let changed = tx.execute(
                "UPDATE users SET username = ?1 WHERE id = ?2",
                (&username, id.to_string()),
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound("user"));
            }
            query_user_by_id(tx, id)?.ok_or(StoreError::NotFound("user"))
        })
    }

    /// Broker availability toggle.
    pub fn set_online(&self, id: Uuid, online: bool) -> StoreResult<User> {
        self.with_tx(|tx| {
            let user = query_user_by_id(tx, id)?.ok_or(StoreError::NotFound("user"))?;
            if user.role != Role::Broker {
                return Err(StoreError::Permission("only brokers have an availability status"));
            }
            tx.execute(
                "UPDATE users SET online = ?1 WHERE id = ?2",
                (online, id.to_string()),
            )?;
            Ok(User { online, ..user })
        })
    }

    pub fn set_role(&self, id: Uuid, role: Role) -> StoreResult<()> {
        self.with_conn(|conn| {
            // Demoted brokers drop out of the online list
            let changed = conn.execute(
                "UPDATE users SET role = ?1, online = CASE WHEN ?1 = 'broker' THEN online ELSE 0 END
                 WHERE id = ?2",
                (role.as_str(), id.to_string()),
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound("user"));
            }
            info!("User {} is now {}", id, role.as_str());
            Ok(())
        })
    }

    /// Promotes the account with this e-mail to broker. Returns false when no such account exists yet.
    pub fn promote_by_email(&self, email: &str) -> StoreResult<bool> {
        let email = email.trim().to_lowercase();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET role = 'broker' WHERE email = ?1",
                [&email],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn list_online_brokers(&self) -> StoreResult<Vec<UserSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username FROM users
                 WHERE role = 'broker' AND online = 1
                 ORDER BY username",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(UserSummary {
                        id: get_uuid(row, 0)?,
                        username: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Public profile of `uid` as seen by `viewer`.
    pub fn profile(&self, viewer: Uuid, uid: Uuid) -> StoreResult<Profile> {
        self.with_conn(|conn| {
            let user = query_user_by_id(conn, uid)?.ok_or(StoreError::NotFound("user"))?;
            let friends = friends::query_friends(conn, uid)?;
            let is_self = viewer == uid;
            let is_friend = !is_self && friends.iter().any(|f| f.friend_id == viewer);

            Ok(Profile {
                user: UserSummary {
                    id: user.id,
                    username: user.username,
                },
                member_since: user.created_at,
                role: user.role,
                online: user.role == Role::Broker && user.online,
                friends,
                is_self,
                is_friend,
            })
        })
    }
}

pub(crate) fn validate_username(username: &str) -> StoreResult<String> {
    let username = username.trim();
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(StoreError::validation("username must be 3 to 32 characters"));
    }
    if username.contains('@') {
        return Err(StoreError::validation("username may not contain '@'"));
    }
    Ok(username.to_string())
}

fn normalize_email(email: &str) -> StoreResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(StoreError::validation("invalid e-mail address")),
    }
}

fn bump_version(conn: &Connection, id: Uuid) -> StoreResult<i64> {
    let changed = conn.execute(
        "UPDATE users SET token_version = token_version + 1 WHERE id = ?1",
        [id.to_string()],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound("user"));
    }
    Ok(conn.query_row(
        "SELECT token_version FROM users WHERE id = ?1",
        [id.to_string()],
        |row| row.get(0),
    )?)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: get_uuid(row, 0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        role: get_parsed(row, 3)?,
        online: row.get(4)?,
        created_at: get_ts(row, 5)?,
    })
}

fn query_one_user(conn: &Connection, filter: &str, value: &str) -> StoreResult<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, filter);
    Ok(conn.query_row(&sql, [value], map_user).optional()?)
}

pub(crate) fn query_user_by_id(conn: &Connection, id: Uuid) -> StoreResult<Option<User>> {
    query_one_user(conn, "id", &id.to_string())
}

fn query_user_by_email(conn: &Connection, email: &str) -> StoreResult<Option<User>> {
    query_one_user(conn, "email", email)
}

fn query_user_by_username(conn: &Connection, username: &str) -> StoreResult<Option<User>> {
    query_one_user(conn, "username", username)
}

pub(crate) fn find_user_by_identifier(conn: &Connection, identifier: &str) -> StoreResult<Option<User>> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Ok(None);
    }
    if identifier.contains('@') {
        query_user_by_email(conn, &identifier.to_lowercase())
    } else {
        query_user_by_username(conn, identifier)
    }
}

fn query_credentials(conn: &Connection, sql: &str, value: &str) -> StoreResult<Option<CredentialsRow>> {
    let row = conn
        .query_row(sql, [value], |row| {
            Ok(CredentialsRow {
                user: map_user(row)?,
                password_hash: row.get(6)?,
                token_version: row.get(7)?,
            })
        })
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{broker, db, user};

    #[test]
    fn duplicate_email_or_username_conflicts() {
        let db = db();
        db.create_user(Uuid::new_v4(), "Alice@Example.com", "alice", "h").unwrap();

        let err = db
            .create_user(Uuid::new_v4(), "alice@example.com", "alice2", "h")
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = db
            .create_user(Uuid::new_v4(), "other@example.com", "alice", "h")
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn registration_validates_fields() {
        let db = db();
        assert!(matches!(
            db.create_user(Uuid::new_v4(), "nope", "valid", "h"),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            db.create_user(Uuid::new_v4(), "a@b.c", "xy", "h"),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn find_user_by_email_or_username() {
        let db = db();
        let bob = user(&db, "bob");

        assert_eq!(db.find_user("bob").unwrap().unwrap().id, bob.id);
        assert_eq!(db.find_user("BOB@example.com").unwrap().unwrap().id, bob.id);
        assert!(db.find_user("robert").unwrap().is_none());
        assert!(db.find_user("   ").unwrap().is_none());
    }

    #[test]
    fn password_change_bumps_token_version() {
        let db = db();
        let bob = user(&db, "bob");
        assert_eq!(db.token_identity(bob.id).unwrap(), Some((0, "bob".to_string())));

        let v = db.update_password(bob.id, "new-hash").unwrap();
        assert_eq!(v, 1);
        let creds = db.get_credentials(bob.id).unwrap().unwrap();
        assert_eq!(creds.password_hash, "new-hash");
        assert_eq!(creds.token_version, 1);

        assert_eq!(db.bump_token_version(bob.id).unwrap(), 2);
    }

    #[test]
    fn rename_rejects_taken_names_but_allows_own() {
        let db = db();
        let bob = user(&db, "bob");
        user(&db, "carol");

        assert!(matches!(
            db.update_username(bob.id, "carol"),
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(db.update_username(bob.id, "bob").unwrap().username, "bob");
        assert_eq!(db.update_username(bob.id, "bobby").unwrap().username, "bobby");
    }

    #[test]
    fn only_brokers_toggle_availability() {
        let db = db();
        let plain = user(&db, "plain");
        let mm = broker(&db, "midman");

        assert!(matches!(
            db.set_online(plain.id, true),
            Err(StoreError::Permission(_))
        ));

        db.set_online(mm.id, true).unwrap();
        let online = db.list_online_brokers().unwrap();
        assert_eq!(online, vec![UserSummary { id: mm.id, username: "midman".into() }]);

        db.set_role(mm.id, Role::User).unwrap();
        assert!(db.list_online_brokers().unwrap().is_empty());
    }

    #[test]
    fn promote_by_email_reports_missing_accounts() {
        let db = db();
        let bob = user(&db, "bob");
        assert!(db.promote_by_email("bob@example.com").unwrap());
        assert!(!db.promote_by_email("ghost@example.com").unwrap());
        assert_eq!(db.get_user(bob.id).unwrap().unwrap().role, Role::Broker);
    }
}
