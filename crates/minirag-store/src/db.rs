use rusqlite::{Connection, Result};

/// Initialise the full metadata schema. Safe to call on every startup -
/// `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    create_tenants_table(conn)?;
    create_users_table(conn)?;
    create_api_tokens_table(conn)?;
    create_bot_profiles_table(conn)?;
    create_sources_table(conn)?;
    create_documents_table(conn)?;
    create_chunks_table(conn)?;
    create_chats_table(conn)?;
    create_messages_table(conn)?;
    create_usage_events_table(conn)?;
    create_webhooks_table(conn)?;
    Ok(())
}

fn create_tenants_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenants (
            id          TEXT PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            slug        TEXT NOT NULL UNIQUE,
            plan        TEXT NOT NULL DEFAULT 'free',
            status      TEXT NOT NULL DEFAULT 'active',
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    )
}

fn create_users_table(conn: &Connection) -> Result<()> {
    // Email uniqueness is per tenant; the same address may own accounts in
    // two different tenants.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY NOT NULL,
            tenant_id     TEXT NOT NULL REFERENCES tenants(id),
            email         TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            role          TEXT NOT NULL DEFAULT 'member',
            is_active     INTEGER NOT NULL DEFAULT 1,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            UNIQUE(tenant_id, email)
        );
        CREATE INDEX IF NOT EXISTS idx_users_tenant
            ON users(tenant_id);",
    )
}

fn create_api_tokens_table(conn: &Connection) -> Result<()> {
    // token_hash is globally unique: the auth hot path resolves a presented
    // token with a single indexed lookup on its digest.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS api_tokens (
            id            TEXT PRIMARY KEY NOT NULL,
            tenant_id     TEXT NOT NULL REFERENCES tenants(id),
            user_id       TEXT NOT NULL REFERENCES users(id),
            name          TEXT NOT NULL,
            token_hash    TEXT NOT NULL UNIQUE,
            last_used_at  TEXT,
            revoked_at    TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_api_tokens_tenant
            ON api_tokens(tenant_id);",
    )
}

fn create_bot_profiles_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bot_profiles (
            id                    TEXT PRIMARY KEY NOT NULL,
            tenant_id             TEXT NOT NULL REFERENCES tenants(id),
            name                  TEXT NOT NULL,
            model                 TEXT NOT NULL,
            system_prompt         TEXT NOT NULL DEFAULT '',
            temperature           REAL NOT NULL DEFAULT 0.7,
            max_tokens            INTEGER NOT NULL DEFAULT 1024,
            encrypted_credentials TEXT,
            is_active             INTEGER NOT NULL DEFAULT 1,
            created_at            TEXT NOT NULL,
            updated_at            TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_bot_profiles_tenant
            ON bot_profiles(tenant_id);",
    )
}

fn create_sources_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sources (
            id                TEXT PRIMARY KEY NOT NULL,
            tenant_id         TEXT NOT NULL REFERENCES tenants(id),
            bot_profile_id    TEXT NOT NULL REFERENCES bot_profiles(id),
            parent_source_id  TEXT REFERENCES sources(id),
            source_type       TEXT NOT NULL,
            status            TEXT NOT NULL DEFAULT 'pending',
            name              TEXT NOT NULL,
            content           TEXT NOT NULL,
            config            TEXT NOT NULL DEFAULT '{}',
            refresh_schedule  TEXT NOT NULL DEFAULT 'none',
            last_refreshed_at TEXT,
            last_error        TEXT,
            document_count    INTEGER NOT NULL DEFAULT 0,
            chunk_count       INTEGER NOT NULL DEFAULT 0,
            is_active         INTEGER NOT NULL DEFAULT 1,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sources_tenant
            ON sources(tenant_id);
        CREATE INDEX IF NOT EXISTS idx_sources_refresh
            ON sources(refresh_schedule, status, is_active);",
    )
}

fn create_documents_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            id          TEXT PRIMARY KEY NOT NULL,
            tenant_id   TEXT NOT NULL REFERENCES tenants(id),
            source_id   TEXT NOT NULL REFERENCES sources(id),
            content     TEXT NOT NULL,
            char_count  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_source
            ON documents(source_id);",
    )
}

fn create_chunks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chunks (
            id              TEXT PRIMARY KEY NOT NULL,
            tenant_id       TEXT NOT NULL REFERENCES tenants(id),
            document_id     TEXT NOT NULL REFERENCES documents(id),
            source_id       TEXT NOT NULL REFERENCES sources(id),
            bot_profile_id  TEXT NOT NULL REFERENCES bot_profiles(id),
            ordinal         INTEGER NOT NULL,
            content         TEXT NOT NULL,
            vector_id       TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_source
            ON chunks(source_id);
        CREATE INDEX IF NOT EXISTS idx_chunks_tenant
            ON chunks(tenant_id);",
    )
}

fn create_chats_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chats (
            id                      TEXT PRIMARY KEY NOT NULL,
            tenant_id               TEXT NOT NULL REFERENCES tenants(id),
            bot_profile_id          TEXT NOT NULL REFERENCES bot_profiles(id),
            user_id                 TEXT NOT NULL REFERENCES users(id),
            title                   TEXT NOT NULL DEFAULT '',
            total_prompt_tokens     INTEGER NOT NULL DEFAULT 0,
            total_completion_tokens INTEGER NOT NULL DEFAULT 0,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chats_tenant
            ON chats(tenant_id, updated_at DESC);",
    )
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id                TEXT PRIMARY KEY NOT NULL,
            chat_id           TEXT NOT NULL REFERENCES chats(id),
            tenant_id         TEXT NOT NULL REFERENCES tenants(id),
            role              TEXT NOT NULL,
            content           TEXT NOT NULL,
            context_chunks    TEXT,
            feedback          TEXT,
            prompt_tokens     INTEGER NOT NULL DEFAULT 0,
            completion_tokens INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at);",
    )
}

fn create_usage_events_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS usage_events (
            id                     TEXT PRIMARY KEY NOT NULL,
            tenant_id              TEXT NOT NULL REFERENCES tenants(id),
            chat_id                TEXT NOT NULL REFERENCES chats(id),
            message_id             TEXT NOT NULL REFERENCES messages(id),
            model                  TEXT NOT NULL,
            prompt_tokens          INTEGER NOT NULL DEFAULT 0,
            completion_tokens      INTEGER NOT NULL DEFAULT 0,
            is_stream              INTEGER NOT NULL DEFAULT 0,
            time_to_first_token_ms INTEGER,
            stream_duration_ms     INTEGER,
            created_at             TEXT NOT NULL,
            updated_at             TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_usage_tenant
            ON usage_events(tenant_id, created_at);",
    )
}

fn create_webhooks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS webhooks (
            id          TEXT PRIMARY KEY NOT NULL,
            tenant_id   TEXT NOT NULL REFERENCES tenants(id),
            url         TEXT NOT NULL,
            secret      TEXT NOT NULL,
            events      TEXT NOT NULL DEFAULT '[]',
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_webhooks_tenant
            ON webhooks(tenant_id);",
    )
}
