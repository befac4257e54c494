//! DDL applied at start-up by [`SeaOrmStore::ensure_schema`](super::store::SeaOrmStore::ensure_schema).

pub const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tracked_apis (
        id SERIAL PRIMARY KEY,
        user_id INTEGER NOT NULL,
        name VARCHAR(200) NOT NULL,
        base_url VARCHAR(500) NOT NULL,
        documentation_url VARCHAR(500),
        health_check_url VARCHAR(500),
        http_method VARCHAR(10) NOT NULL DEFAULT 'GET',
        expected_status INTEGER NOT NULL DEFAULT 200,
        check_interval_seconds INTEGER NOT NULL DEFAULT 3600,
        current_status TEXT NOT NULL DEFAULT 'UNKNOWN',
        last_checked TIMESTAMPTZ,
        next_check_at TIMESTAMPTZ,
        last_fingerprint VARCHAR(64),
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        consecutive_failures INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS tracked_apis_user_idx ON tracked_apis (user_id)",
    r#"
    CREATE TABLE IF NOT EXISTS health_checks (
        id BIGSERIAL PRIMARY KEY,
        api_id INTEGER NOT NULL REFERENCES tracked_apis (id) ON DELETE CASCADE,
        checked_at TIMESTAMPTZ NOT NULL,
        http_status INTEGER,
        response_time_ms INTEGER NOT NULL,
        is_up BOOLEAN NOT NULL,
        error_kind VARCHAR(32),
        error_message VARCHAR(500),
        fingerprint VARCHAR(64)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS health_checks_api_time_idx ON health_checks (api_id, checked_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        id SERIAL PRIMARY KEY,
        api_id INTEGER NOT NULL REFERENCES tracked_apis (id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL,
        alert_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        title VARCHAR(200) NOT NULL,
        description TEXT,
        is_resolved BOOLEAN NOT NULL DEFAULT FALSE,
        resolved_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    // At most one unresolved alert per (api, alert type).
    "CREATE UNIQUE INDEX IF NOT EXISTS alerts_one_open_per_type ON alerts (api_id, alert_type) WHERE is_resolved = FALSE",
    "CREATE INDEX IF NOT EXISTS alerts_user_created_idx ON alerts (user_id, created_at DESC)",
];
