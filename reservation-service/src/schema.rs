diesel::table! {
    products (id) {
        id -> Uuid,
        name -> Varchar,
        category -> Varchar,
        price -> Numeric,
        total_quantity -> Int4,
        available_quantity -> Int4,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    bookings (id) {
        id -> Uuid,
        user_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(bookings -> products (product_id));

diesel::allow_tables_to_appear_in_same_query!(
    bookings,
    products,
);
