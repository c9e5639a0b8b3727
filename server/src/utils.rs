use shared::random_token;

/// Length of connection ids handed out to clients.
pub const CLIENT_ID_LEN: usize = 8;

// Draw random ids until one is not taken
pub fn unique_id(is_taken: impl Fn(&str) -> bool) -> String {
    loop {
        let id = random_token(CLIENT_ID_LEN);
        if !is_taken(&id) {
            return id;
        }
    }
}

/// Caps a measured frame delta so a stalled tick cannot launch entities.
pub fn capped_delta(delta: f32, max: f32) -> f32 {
    if delta > max {
        log::warn!("Large delta time detected ({:.3}s), capping to {:.3}s", delta, max);
        max
    } else {
        delta.max(0.0)
    }
}
