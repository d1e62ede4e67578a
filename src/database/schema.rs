// @generated-by-hand to match migrations/2024-01-01-000000_init/up.sql.

diesel::table! {
    conversation_turns (id) {
        id -> Integer,
        user_text -> Text,
        assistant_text -> Text,
        created_at_ms -> BigInt,
        flagged_injection -> Integer,
    }
}

diesel::table! {
    installed_tools (slug) {
        slug -> Text,
        label -> Text,
        enabled -> Integer,
        install_state -> Text,
        connection_id -> Nullable<Text>,
        last_error -> Nullable<Text>,
        updated_at_ms -> BigInt,
    }
}

diesel::table! {
    cron_jobs (id) {
        id -> Text,
        name -> Text,
        job_type -> Text,
        expression -> Nullable<Text>,
        interval_minutes -> Nullable<Integer>,
        run_at_ms -> Nullable<BigInt>,
        timezone -> Nullable<Text>,
        prompt -> Text,
        enabled -> Integer,
        created_at_ms -> BigInt,
        last_run_ms -> Nullable<BigInt>,
        run_count -> Integer,
        last_run_error -> Nullable<Text>,
    }
}

diesel::table! {
    cron_job_history (id) {
        id -> Integer,
        job_id -> Text,
        started_at_ms -> BigInt,
        finished_at_ms -> BigInt,
        status -> Text,
        output -> Text,
    }
}

diesel::table! {
    schema_pins (server_key) {
        server_key -> Text,
        hash -> Text,
        tool_names_json -> Text,
        fingerprints_json -> Text,
        updated_at_ms -> BigInt,
    }
}

diesel::table! {
    cost_history (day, model) {
        day -> Text,
        model -> Text,
        cost_usd -> Double,
        input_tokens -> BigInt,
        output_tokens -> BigInt,
        requests -> BigInt,
    }
}

diesel::table! {
    usage_stats (day) {
        day -> Text,
        agent_runs -> BigInt,
        approvals_granted -> BigInt,
        approvals_denied -> BigInt,
        injection_warnings -> BigInt,
        claimed_action_fires -> BigInt,
        tier_escalations -> BigInt,
        memory_write_blocks -> BigInt,
        tool_calls_json -> Text,
    }
}

diesel::table! {
    leader_election (scope) {
        scope -> Text,
        tab_id -> Text,
        heartbeat_ms -> BigInt,
    }
}

diesel::table! {
    memory_entries (id) {
        id -> Text,
        key -> Text,
        content -> Text,
        category -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    conversation_turns,
    installed_tools,
    cron_jobs,
    cron_job_history,
    schema_pins,
    cost_history,
    usage_stats,
    leader_election,
    memory_entries,
);
