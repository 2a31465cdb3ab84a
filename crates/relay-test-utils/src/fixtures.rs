// fixtures: JSON event frames in the upstream wire shape.

use serde_json::json;

/// A `post_created` frame.
pub fn post_event(username: &str, tweet_id: &str, text: &str, timestamp: &str) -> serde_json::Value {
    json!({
        "type": "post_created",
        "timestamp": timestamp,
        "primaryId": tweet_id,
        "user": {
            "username": username,
            "displayName": capitalize(username),
            "userId": format!("uid-{}", username),
        },
        "data": {"tweet": {"id": tweet_id, "body": {"text": text}}},
    })
}

/// A `follow_created` frame: `username` followed `target`.
pub fn follow_event(username: &str, target: &str, timestamp: &str) -> serde_json::Value {
    json!({
        "type": "follow_created",
        "timestamp": timestamp,
        "primaryId": format!("uid-{}", username),
        "user": {
            "username": username,
            "displayName": capitalize(username),
            "userId": format!("uid-{}", username),
        },
        "data": {
            "user": {"id": format!("uid-{}", username)},
            "following": {
                "id": format!("uid-{}", target),
                "handle": target,
                "profile": {"name": capitalize(target)},
            },
        },
    })
}

/// A `profile_updated` frame.
pub fn profile_event(username: &str, description: &str, timestamp: &str) -> serde_json::Value {
    json!({
        "type": "profile_updated",
        "timestamp": timestamp,
        "primaryId": format!("uid-{}", username),
        "user": {
            "username": username,
            "displayName": capitalize(username),
            "userId": format!("uid-{}", username),
        },
        "data": {
            "user": {
                "id": format!("uid-{}", username),
                "profile": {
                    "name": capitalize(username),
                    "description": {"text": description},
                },
            },
        },
    })
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
