//! PostgreSQL implementation of the domain store ports.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use domain::errors::StoreError;
use domain::models::{
    Event, FoodPreference, HostRequest, NewEvent, NewUser, Referral, ReferralStatus, Role, User,
    VerificationCode,
};
use domain::store::{Store, StoreTx};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::entities::{
    EventEntity, HostRequestEntity, ReferralEntity, UserEntity, VerificationCodeEntity,
};
use crate::metrics::QueryTimer;

const UNIQUE_VIOLATION: &str = "23505";

const USER_COLUMNS: &str = r#"
    u.id, u.email, u.password_hash, u.name, u.status, u.active, u.disabled,
    u.login_count, u.expo_push_token, u.created_at, u.updated_at,
    ARRAY(SELECT r.role FROM user_roles r WHERE r.user_id = u.id ORDER BY r.role) AS roles,
    ARRAY(SELECT p.preference FROM user_food_preferences p
          WHERE p.user_id = u.id ORDER BY p.preference) AS food_preferences
"#;

const EVENT_COLUMNS: &str = r#"
    e.id, e.host_id, e.title, e.details, e.location, e.servings,
    e.start_date, e.end_date, e.created_at,
    ARRAY(SELECT p.preference FROM event_food_preferences p
          WHERE p.event_id = e.id ORDER BY p.preference) AS food_preferences
"#;

const HOST_REQUEST_COLUMNS: &str =
    "user_id, primary_affiliation, directory, reason, created_at, approved_at, approved_by";

/// Maps a driver error onto the store taxonomy.
pub(crate) fn map_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

/// Store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await.map_err(map_err)?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// One PostgreSQL transaction. Dropped without commit, sqlx rolls it back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn insert_preferences(
        &mut self,
        table: &str,
        owner_column: &str,
        owner: Uuid,
        preferences: &BTreeSet<FoodPreference>,
    ) -> Result<(), StoreError> {
        let ids: Vec<i32> = preferences.iter().map(FoodPreference::id).collect();
        sqlx::query(&format!(
            "INSERT INTO {table} ({owner_column}, preference) SELECT $1, UNNEST($2::INT[])"
        ))
        .bind(owner)
        .bind(&ids)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_err)
    }

    async fn get_user(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        let timer = QueryTimer::new("get_user");
        let row = sqlx::query_as::<_, UserEntity>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await;
        timer.record();
        row.map_err(map_err)?.map(User::try_from).transpose()
    }

    async fn get_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        let timer = QueryTimer::new("get_user_by_email");
        let row = sqlx::query_as::<_, UserEntity>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.email = $1"
        ))
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await;
        timer.record();
        row.map_err(map_err)?.map(User::try_from).transpose()
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        let timer = QueryTimer::new("insert_user");
        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, name, status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.status.as_str())
        .execute(&mut *self.tx)
        .await;
        timer.record();
        inserted.map_err(map_err)?;

        sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
            .bind(id)
            .bind(Role::User.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;

        self.get_user(id)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("user {} vanished after insert", id)))
    }

    async fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        let timer = QueryTimer::new("update_user");
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = $2, password_hash = $3, name = $4, status = $5, active = $6,
                disabled = $7, login_count = $8, expo_push_token = $9, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.status.as_str())
        .bind(user.active)
        .bind(user.disabled)
        .bind(user.login_count)
        .bind(&user.expo_push_token)
        .execute(&mut *self.tx)
        .await;
        timer.record();

        if result.map_err(map_err)?.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }

    async fn set_user_roles(
        &mut self,
        user_id: Uuid,
        roles: &BTreeSet<Role>,
    ) -> Result<(), StoreError> {
        let names: Vec<&str> = roles.iter().map(Role::as_str).collect();
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;
        sqlx::query("INSERT INTO user_roles (user_id, role) SELECT $1, UNNEST($2::TEXT[])")
            .bind(user_id)
            .bind(&names)
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn set_user_food_preferences(
        &mut self,
        user_id: Uuid,
        preferences: &BTreeSet<FoodPreference>,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM user_food_preferences WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;
        self.insert_preferences("user_food_preferences", "user_id", user_id, preferences)
            .await
    }

    async fn list_users(&mut self) -> Result<Vec<User>, StoreError> {
        let timer = QueryTimer::new("list_users");
        let rows = sqlx::query_as::<_, UserEntity>(&format!(
            "SELECT {USER_COLUMNS} FROM users u ORDER BY u.seq"
        ))
        .fetch_all(&mut *self.tx)
        .await;
        timer.record();
        rows.map_err(map_err)?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    async fn list_pending_users(&mut self, limit: usize) -> Result<Vec<User>, StoreError> {
        let timer = QueryTimer::new("list_pending_users");
        let rows = sqlx::query_as::<_, UserEntity>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users u
            WHERE NOT u.active AND NOT u.disabled AND u.status <> 'REFERRAL'
              AND NOT EXISTS (SELECT 1 FROM verification_codes v WHERE v.user_id = u.id)
            ORDER BY u.seq
            LIMIT $1
            "#
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *self.tx)
        .await;
        timer.record();
        rows.map_err(map_err)?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    async fn get_verification_for_user(
        &mut self,
        user_id: Uuid,
    ) -> Result<Option<VerificationCode>, StoreError> {
        let row = sqlx::query_as::<_, VerificationCodeEntity>(
            "SELECT code, user_id, created_at FROM verification_codes WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(row.map(Into::into))
    }

    async fn insert_verification(&mut self, code: &VerificationCode) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO verification_codes (code, user_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&code.code)
        .bind(code.user_id)
        .bind(code.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn take_verification(&mut self, code: &str, user_id: Uuid) -> Result<bool, StoreError> {
        let timer = QueryTimer::new("take_verification");
        let result = sqlx::query("DELETE FROM verification_codes WHERE code = $1 AND user_id = $2")
            .bind(code)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await;
        timer.record();
        Ok(result.map_err(map_err)?.rows_affected() > 0)
    }

    async fn delete_verification_for_user(&mut self, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM verification_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn get_property(&mut self, name: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT value FROM properties WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_err)
    }

    async fn set_property(&mut self, name: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO properties (name, value) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(name)
        .bind(value)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn decrement_property_if_positive(
        &mut self,
        name: &str,
    ) -> Result<Option<i64>, StoreError> {
        // The row lock taken by UPDATE serializes concurrent decrements; a
        // waiter re-checks the predicate against the committed value.
        let timer = QueryTimer::new("decrement_property_if_positive");
        let value = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE properties
            SET value = (CAST(value AS BIGINT) - 1)::TEXT
            WHERE name = $1
              AND (CASE WHEN value ~ '^\s*-?[0-9]+\s*$' THEN CAST(value AS BIGINT) ELSE 0 END) > 0
            RETURNING value
            "#,
        )
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await;
        timer.record();

        match value.map_err(map_err)? {
            Some(v) => v
                .parse::<i64>()
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("property {}: {}", name, e))),
            None => Ok(None),
        }
    }

    async fn increment_property(&mut self, name: &str, by: i64) -> Result<i64, StoreError> {
        let timer = QueryTimer::new("increment_property");
        let value = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO properties (name, value) VALUES ($1, $2::TEXT)
            ON CONFLICT (name) DO UPDATE SET value = (
                (CASE WHEN properties.value ~ '^\s*-?[0-9]+\s*$'
                      THEN CAST(properties.value AS BIGINT) ELSE 0 END) + $2
            )::TEXT
            RETURNING value
            "#,
        )
        .bind(name)
        .bind(by)
        .fetch_one(&mut *self.tx)
        .await;
        timer.record();

        value
            .map_err(map_err)?
            .parse::<i64>()
            .map_err(|e| StoreError::Backend(format!("property {}: {}", name, e)))
    }

    async fn insert_host_request(&mut self, request: &HostRequest) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO host_requests ({HOST_REQUEST_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(request.user_id)
        .bind(request.primary_affiliation)
        .bind(&request.directory)
        .bind(&request.reason)
        .bind(request.created_at)
        .bind(request.approved_at)
        .bind(request.approved_by)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_host_request(
        &mut self,
        user_id: Uuid,
    ) -> Result<Option<HostRequest>, StoreError> {
        let row = sqlx::query_as::<_, HostRequestEntity>(&format!(
            "SELECT {HOST_REQUEST_COLUMNS} FROM host_requests WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(row.map(Into::into))
    }

    async fn update_host_request(&mut self, request: &HostRequest) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE host_requests
            SET primary_affiliation = $2, directory = $3, reason = $4,
                approved_at = $5, approved_by = $6
            WHERE user_id = $1
            "#,
        )
        .bind(request.user_id)
        .bind(request.primary_affiliation)
        .bind(&request.directory)
        .bind(&request.reason)
        .bind(request.approved_at)
        .bind(request.approved_by)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("host request {}", request.user_id)));
        }
        Ok(())
    }

    async fn list_pending_host_requests(&mut self) -> Result<Vec<HostRequest>, StoreError> {
        let rows = sqlx::query_as::<_, HostRequestEntity>(&format!(
            "SELECT {HOST_REQUEST_COLUMNS} FROM host_requests WHERE approved_at IS NULL ORDER BY created_at"
        ))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_referral(&mut self, referral: &Referral) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO referrals (requester_id, reference_id, status, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(referral.requester_id)
        .bind(referral.reference_id)
        .bind(referral.status.as_str())
        .bind(referral.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_referral(&mut self, requester_id: Uuid) -> Result<Option<Referral>, StoreError> {
        let row = sqlx::query_as::<_, ReferralEntity>(
            r#"
            SELECT requester_id, reference_id, status, created_at
            FROM referrals
            WHERE requester_id = $1
            "#,
        )
        .bind(requester_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err)?;
        row.map(Referral::try_from).transpose()
    }

    async fn update_referral(&mut self, referral: &Referral) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE referrals SET reference_id = $2, status = $3 WHERE requester_id = $1",
        )
        .bind(referral.requester_id)
        .bind(referral.reference_id)
        .bind(referral.status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "referral {}",
                referral.requester_id
            )));
        }
        Ok(())
    }

    async fn list_referrals(
        &mut self,
        reference_id: Uuid,
        status: Option<ReferralStatus>,
    ) -> Result<Vec<Referral>, StoreError> {
        let rows = sqlx::query_as::<_, ReferralEntity>(
            r#"
            SELECT requester_id, reference_id, status, created_at
            FROM referrals
            WHERE reference_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at
            "#,
        )
        .bind(reference_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_err)?;
        rows.into_iter().map(Referral::try_from).collect()
    }

    async fn insert_event(&mut self, host_id: Uuid, event: NewEvent) -> Result<Event, StoreError> {
        let timer = QueryTimer::new("insert_event");
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO events (id, host_id, title, details, location, servings,
                                start_date, end_date, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(host_id)
        .bind(&event.title)
        .bind(&event.details)
        .bind(&event.location)
        .bind(event.servings)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(created_at)
        .execute(&mut *self.tx)
        .await;
        timer.record();
        inserted.map_err(map_err)?;

        self.insert_preferences(
            "event_food_preferences",
            "event_id",
            id,
            &event.food_preferences,
        )
        .await?;

        Ok(Event {
            id,
            host_id,
            title: event.title,
            details: event.details,
            location: event.location,
            servings: event.servings,
            start_date: event.start_date,
            end_date: event.end_date,
            food_preferences: event.food_preferences,
            created_at,
        })
    }

    async fn get_event(&mut self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query_as::<_, EventEntity>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events e WHERE e.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err)?;
        row.map(Event::try_from).transpose()
    }

    async fn list_events(&mut self, limit: Option<usize>) -> Result<Vec<Event>, StoreError> {
        let timer = QueryTimer::new("list_events");
        let rows = sqlx::query_as::<_, EventEntity>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events e
            ORDER BY e.created_at DESC, e.id
            LIMIT $1
            "#
        ))
        .bind(limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX)))
        .fetch_all(&mut *self.tx)
        .await;
        timer.record();
        rows.map_err(map_err)?
            .into_iter()
            .map(Event::try_from)
            .collect()
    }

    async fn insert_recommendation(
        &mut self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_recommended_events (event_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_recommended_user_ids(
        &mut self,
        event_id: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM user_recommended_events WHERE event_id = $1 ORDER BY created_at",
        )
        .bind(event_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_err)
    }

    async fn list_recommended_events(&mut self, user_id: Uuid) -> Result<Vec<Event>, StoreError> {
        let timer = QueryTimer::new("list_recommended_events");
        let rows = sqlx::query_as::<_, EventEntity>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events e
            JOIN user_recommended_events r ON r.event_id = e.id
            WHERE r.user_id = $1
            ORDER BY e.start_date
            "#
        ))
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await;
        timer.record();
        rows.map_err(map_err)?
            .into_iter()
            .map(Event::try_from)
            .collect()
    }

    async fn insert_acceptance(
        &mut self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_accepted_events (event_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_accepted_event_ids(&mut self, user_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT event_id FROM user_accepted_events WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_err)
    }
}
