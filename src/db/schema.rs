diesel::table! {
    comments (id) {
        id -> Uuid,
        content -> Text,
        video -> Uuid,
        owner -> Uuid,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    likes (id) {
        id -> Uuid,
        target_kind -> Varchar,
        target_id -> Uuid,
        liked_by -> Uuid,
        created_at -> Timestamp,
    }
}

diesel::table! {
    playlist_videos (playlist_id, video_id) {
        playlist_id -> Uuid,
        video_id -> Uuid,
        position -> Int8,
    }
}

diesel::table! {
    playlists (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Text,
        owner -> Uuid,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    subscriptions (id) {
        id -> Uuid,
        subscriber -> Uuid,
        channel -> Uuid,
        created_at -> Timestamp,
    }
}

diesel::table! {
    tweets (id) {
        id -> Uuid,
        content -> Text,
        owner -> Uuid,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        user_name -> Varchar,
        email -> Varchar,
        full_name -> Varchar,
        avatar -> Varchar,
        avatar_public_id -> Nullable<Varchar>,
        cover_image -> Varchar,
        cover_image_public_id -> Nullable<Varchar>,
        password -> Varchar,
        refresh_token -> Nullable<Varchar>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    videos (id) {
        id -> Uuid,
        title -> Varchar,
        description -> Text,
        video_url -> Varchar,
        video_public_id -> Varchar,
        thumbnail_url -> Varchar,
        thumbnail_public_id -> Varchar,
        duration -> Float8,
        views -> Int8,
        is_published -> Bool,
        is_for_kids -> Bool,
        is_restricted -> Bool,
        owner -> Uuid,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    watch_history (user_id, video_id) {
        user_id -> Uuid,
        video_id -> Uuid,
        watched_at -> Timestamp,
    }
}

diesel::joinable!(comments -> users (owner));
diesel::joinable!(comments -> videos (video));
diesel::joinable!(likes -> users (liked_by));
diesel::joinable!(playlist_videos -> playlists (playlist_id));
diesel::joinable!(playlist_videos -> videos (video_id));
diesel::joinable!(playlists -> users (owner));
diesel::joinable!(tweets -> users (owner));
diesel::joinable!(videos -> users (owner));
diesel::joinable!(watch_history -> users (user_id));
diesel::joinable!(watch_history -> videos (video_id));

diesel::allow_tables_to_appear_in_same_query!(
    comments,
    likes,
    playlist_videos,
    playlists,
    subscriptions,
    tweets,
    users,
    videos,
    watch_history,
);
