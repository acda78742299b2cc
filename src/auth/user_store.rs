//! User Storage
//! Mission: securely store and manage user accounts with SQLite

use crate::auth::models::User;
use crate::principal::Role;
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{info, warn};
use uuid::Uuid;

/// User storage with SQLite backend
pub struct UserStore {
    db_path: String,
}

impl UserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_db(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                tenant TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.create_default_admin(&conn)?;

        Ok(())
    }

    /// Create default platform_admin user for initial setup
    fn create_default_admin(&self, conn: &Connection) -> Result<()> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE role = 'platform_admin'",
                [],
                |row| row.get(0),
            )
            .context("failed to check for platform_admin users")?;

        if count == 0 {
            let password_hash =
                hash("admin123", DEFAULT_COST).context("failed to hash password")?;

            let admin = User {
                id: Uuid::new_v4(),
                username: "admin".to_string(),
                password_hash,
                role: Role::PlatformAdmin,
                tenant: "default".to_string(),
                created_at: Utc::now().to_rfc3339(),
            };

            conn.execute(
                "INSERT INTO users (id, username, password_hash, role, tenant, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    admin.id.to_string(),
                    admin.username,
                    admin.password_hash,
                    admin.role.as_str(),
                    admin.tenant,
                    admin.created_at,
                ],
            )
            .context("failed to insert platform_admin user")?;

            info!("default platform_admin user created (username: admin, password: admin123)");
            warn!("change the default password before running against real funds");
        }

        Ok(())
    }

    fn row_to_user(
        id: String,
        username: String,
        password_hash: String,
        role_str: String,
        tenant: String,
        created_at: String,
    ) -> rusqlite::Result<User> {
        Ok(User {
            id: Uuid::parse_str(&id)
                .map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
            username,
            password_hash,
            role: Role::from_str(&role_str)
                .ok_or_else(|| rusqlite::Error::InvalidColumnType(3, "role".into(), rusqlite::types::Type::Text))?,
            tenant,
            created_at,
        })
    }

    /// Get user by username
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = Connection::open(&self.db_path)?;

        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, role, tenant, created_at
             FROM users WHERE username = ?1",
        )?;

        let user_result = stmt.query_row(params![username], |row| {
            Self::row_to_user(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)
        });

        match user_result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify username and password
    pub fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        match self.get_user_by_username(username)? {
            Some(user) => {
                let valid =
                    verify(password, &user.password_hash).context("failed to verify password")?;
                Ok(valid)
            }
            None => Ok(false),
        }
    }

    /// Create a new user
    pub fn create_user(&self, username: &str, password: &str, role: Role, tenant: &str) -> Result<User> {
        let password_hash = hash(password, DEFAULT_COST).context("failed to hash password")?;

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            role,
            tenant: tenant.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO users (id, username, password_hash, role, tenant, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.to_string(),
                user.username,
                user.password_hash,
                user.role.as_str(),
                user.tenant,
                user.created_at,
            ],
        )
        .context("failed to insert user")?;

        info!(username = %user.username, role = user.role.as_str(), tenant = %user.tenant, "created user");

        Ok(user)
    }

    /// List all users in a tenant
    pub fn list_users(&self, tenant: &str) -> Result<Vec<User>> {
        let conn = Connection::open(&self.db_path)?;

        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, role, tenant, created_at FROM users WHERE tenant = ?1",
        )?;

        let users = stmt
            .query_map(params![tenant], |row| {
                Self::row_to_user(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }

    /// Delete a user by ID
    pub fn delete_user(&self, user_id: &Uuid) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;

        let rows_affected = conn.execute(
            "DELETE FROM users WHERE id = ?1",
            params![user_id.to_string()],
        )?;

        if rows_affected == 0 {
            anyhow::bail!("user not found");
        }

        info!(user_id = %user_id, "deleted user");
        Ok(())
    }
}
