diesel::table! {
    appointments (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        customer_id -> Uuid,
        vehicle_id -> Uuid,
        status -> Varchar,
        version -> Int4,
        scheduled_start -> Timestamptz,
        scheduled_end -> Timestamptz,
        service_codes -> Array<Text>,
        total_amount -> Numeric,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    customers (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Varchar,
        phone -> Nullable<Varchar>,
    }
}

diesel::table! {
    vehicles (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        customer_id -> Uuid,
        make -> Varchar,
        model -> Varchar,
        license_plate -> Nullable<Varchar>,
    }
}

diesel::table! {
    idempotency_records (tenant_id, key) {
        tenant_id -> Uuid,
        key -> Varchar,
        request_fingerprint -> Varchar,
        response_status -> Nullable<Int4>,
        response_body -> Nullable<Jsonb>,
        created_at -> Timestamptz,
        expires_at -> Timestamptz,
    }
}

diesel::joinable!(appointments -> customers (customer_id));
diesel::joinable!(appointments -> vehicles (vehicle_id));

diesel::allow_tables_to_appear_in_same_query!(
    appointments,
    customers,
    vehicles,
    idempotency_records,
);
