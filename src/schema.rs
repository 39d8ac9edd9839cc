// Table definitions for the schema created by `DbContext::init_schema`.

diesel::table! {
    characters (id) {
        id -> BigInt,
        name -> Nullable<Text>,
        payload -> Text,
        fetched_at -> Text,
    }
}

diesel::table! {
    rate_limit_counters (key) {
        key -> Text,
        count -> BigInt,
        expires_at -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(characters, rate_limit_counters);
