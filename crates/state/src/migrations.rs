use sqlx::SqlitePool;

/// Run database migrations, creating every table and index the service
/// relies on if they do not exist.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    const DDL: &[&str] = &[
        // Filter rules and their side counters.
        "CREATE TABLE IF NOT EXISTS filter_rules (
            id TEXT PRIMARY KEY,
            worker_name TEXT NOT NULL DEFAULT 'global',
            category TEXT NOT NULL,
            match_field TEXT NOT NULL,
            match_mode TEXT NOT NULL,
            pattern TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_hit_at TEXT
        )",
        "CREATE INDEX IF NOT EXISTS filter_rules_category_enabled_idx
            ON filter_rules (category, enabled)",
        "CREATE TABLE IF NOT EXISTS rule_stats (
            rule_id TEXT PRIMARY KEY REFERENCES filter_rules (id) ON DELETE CASCADE,
            total_processed INTEGER NOT NULL DEFAULT 0,
            deleted_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT
        )",
        "CREATE TABLE IF NOT EXISTS global_counters (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL DEFAULT 0
        )",
        // Ephemeral subject sightings feeding the dynamic-rule detector.
        "CREATE TABLE IF NOT EXISTS email_subject_tracker (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            worker_name TEXT,
            subject_hash TEXT NOT NULL,
            subject TEXT NOT NULL,
            received_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS email_subject_tracker_hash_received_idx
            ON email_subject_tracker (subject_hash, received_at)",
        // Dynamic-detector configuration, one JSON value per key.
        "CREATE TABLE IF NOT EXISTS detector_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        // Campaign graph.
        "CREATE TABLE IF NOT EXISTS merchants (
            id TEXT PRIMARY KEY,
            domain TEXT NOT NULL UNIQUE,
            display_name TEXT,
            note TEXT,
            analysis_status TEXT NOT NULL DEFAULT 'pending',
            total_campaigns INTEGER NOT NULL DEFAULT 0,
            total_emails INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS merchant_worker_status (
            merchant_id TEXT NOT NULL REFERENCES merchants (id) ON DELETE CASCADE,
            worker_name TEXT NOT NULL,
            analysis_status TEXT NOT NULL,
            display_name TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (merchant_id, worker_name)
        )",
        "CREATE TABLE IF NOT EXISTS campaigns (
            id TEXT PRIMARY KEY,
            merchant_id TEXT NOT NULL REFERENCES merchants (id) ON DELETE CASCADE,
            subject TEXT NOT NULL,
            subject_hash TEXT NOT NULL,
            tag INTEGER NOT NULL DEFAULT 0,
            is_root INTEGER NOT NULL DEFAULT 0,
            is_root_candidate INTEGER NOT NULL DEFAULT 0,
            total_emails INTEGER NOT NULL DEFAULT 0,
            unique_recipients INTEGER NOT NULL DEFAULT 0,
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            UNIQUE (merchant_id, subject_hash)
        )",
        "CREATE TABLE IF NOT EXISTS campaign_emails (
            id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL REFERENCES campaigns (id) ON DELETE CASCADE,
            recipient TEXT NOT NULL,
            received_at TEXT NOT NULL,
            worker_name TEXT NOT NULL DEFAULT 'global'
        )",
        "CREATE INDEX IF NOT EXISTS campaign_emails_worker_idx
            ON campaign_emails (worker_name)",
        "CREATE INDEX IF NOT EXISTS campaign_emails_campaign_recipient_idx
            ON campaign_emails (campaign_id, recipient)",
        "CREATE TABLE IF NOT EXISTS recipient_paths (
            merchant_id TEXT NOT NULL REFERENCES merchants (id) ON DELETE CASCADE,
            recipient TEXT NOT NULL,
            campaign_id TEXT NOT NULL REFERENCES campaigns (id) ON DELETE CASCADE,
            sequence_order INTEGER NOT NULL,
            first_received_at TEXT NOT NULL,
            is_new_user INTEGER NOT NULL DEFAULT 0,
            first_root_campaign_id TEXT,
            PRIMARY KEY (merchant_id, recipient, campaign_id),
            UNIQUE (merchant_id, recipient, sequence_order)
        )",
        "CREATE INDEX IF NOT EXISTS recipient_paths_merchant_recipient_seq_idx
            ON recipient_paths (merchant_id, recipient, sequence_order)",
        // Monitoring rules, signal liveness, hit logs, alerts.
        "CREATE TABLE IF NOT EXISTS monitoring_rules (
            id TEXT PRIMARY KEY,
            merchant TEXT NOT NULL,
            name TEXT NOT NULL,
            subject_pattern TEXT NOT NULL,
            match_mode TEXT NOT NULL DEFAULT 'contains',
            expected_interval_minutes INTEGER NOT NULL,
            dead_after_minutes INTEGER NOT NULL,
            worker_scope TEXT NOT NULL DEFAULT 'global',
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS signal_states (
            rule_id TEXT PRIMARY KEY REFERENCES monitoring_rules (id) ON DELETE CASCADE,
            state TEXT NOT NULL DEFAULT 'DEAD',
            last_seen_at TEXT,
            count_1h INTEGER NOT NULL DEFAULT 0,
            count_12h INTEGER NOT NULL DEFAULT 0,
            count_24h INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS hit_logs (
            id TEXT PRIMARY KEY,
            rule_id TEXT NOT NULL REFERENCES monitoring_rules (id) ON DELETE CASCADE,
            sender TEXT NOT NULL,
            subject TEXT NOT NULL,
            recipient TEXT NOT NULL,
            received_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS hit_logs_rule_received_idx
            ON hit_logs (rule_id, received_at)",
        "CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            rule_id TEXT NOT NULL REFERENCES monitoring_rules (id) ON DELETE CASCADE,
            alert_type TEXT NOT NULL,
            previous_state TEXT NOT NULL,
            current_state TEXT NOT NULL,
            gap_minutes INTEGER NOT NULL DEFAULT 0,
            count_1h INTEGER NOT NULL DEFAULT 0,
            count_12h INTEGER NOT NULL DEFAULT 0,
            count_24h INTEGER NOT NULL DEFAULT 0,
            message TEXT NOT NULL,
            sent_at TEXT,
            created_at TEXT NOT NULL
        )",
        // Ratio monitors.
        "CREATE TABLE IF NOT EXISTS ratio_monitors (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            tag TEXT,
            first_rule_id TEXT NOT NULL,
            second_rule_id TEXT NOT NULL,
            steps TEXT NOT NULL,
            threshold_percent REAL NOT NULL,
            time_window_minutes INTEGER NOT NULL,
            worker_scope TEXT NOT NULL DEFAULT 'global',
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS ratio_states (
            monitor_id TEXT PRIMARY KEY REFERENCES ratio_monitors (id) ON DELETE CASCADE,
            state TEXT NOT NULL DEFAULT 'HEALTHY',
            first_count INTEGER NOT NULL DEFAULT 0,
            second_count INTEGER NOT NULL DEFAULT 0,
            current_ratio REAL,
            steps_data TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS ratio_alerts (
            id TEXT PRIMARY KEY,
            monitor_id TEXT NOT NULL REFERENCES ratio_monitors (id) ON DELETE CASCADE,
            previous_state TEXT NOT NULL,
            current_state TEXT NOT NULL,
            current_ratio REAL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        // Subject statistics, activity log, analysis projects.
        "CREATE TABLE IF NOT EXISTS subject_stats (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL,
            subject_hash TEXT NOT NULL,
            merchant_domain TEXT NOT NULL,
            worker_name TEXT NOT NULL DEFAULT 'global',
            email_count INTEGER NOT NULL DEFAULT 0,
            is_focused INTEGER NOT NULL DEFAULT 0,
            first_seen_at TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (subject_hash, merchant_domain, worker_name)
        )",
        "CREATE TABLE IF NOT EXISTS activity_logs (
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            message TEXT NOT NULL,
            worker_name TEXT NOT NULL DEFAULT 'global',
            created_at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS activity_logs_created_idx
            ON activity_logs (created_at)",
        "CREATE TABLE IF NOT EXISTS analysis_projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            merchant_id TEXT NOT NULL REFERENCES merchants (id) ON DELETE CASCADE,
            worker_names TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'active',
            note TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
    ];

    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
