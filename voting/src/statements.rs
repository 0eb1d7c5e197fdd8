//! Every statement the voting store issues, in execution-ready form.
//!
//! All tables live under the `tessera_voting` schema. The full-info selects
//! share one row shape: `(id, body, type, expiration, approved_power,
//! voters, proposer, double_proposer_vote)`, where `voters` aggregates
//! `int8send(power) || pub_key` blobs; [`crate::codec`] decodes that shape.

pub const CREATE_VOTING_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS tessera_voting";

pub const TABLE_VOTERS: &str = r#"CREATE TABLE IF NOT EXISTS tessera_voting.voters (
    id UUID PRIMARY KEY,
    pub_key BYTEA NOT NULL,
    power INT8 NOT NULL CHECK (power > 0)
)"#;

pub const TABLE_RESOLUTION_TYPES: &str =
    r#"CREATE TABLE IF NOT EXISTS tessera_voting.resolution_types (
    id UUID PRIMARY KEY,
    name TEXT UNIQUE NOT NULL
)"#;

pub const TABLE_RESOLUTIONS: &str = r#"CREATE TABLE IF NOT EXISTS tessera_voting.resolutions (
    id UUID PRIMARY KEY,
    body BYTEA,
    type TEXT REFERENCES tessera_voting.resolution_types (name),
    expiration INT8 NOT NULL,
    proposer BYTEA,
    double_proposer_vote BOOL NOT NULL DEFAULT FALSE
)"#;

pub const RESOLUTIONS_TYPE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS resolutions_type_idx ON tessera_voting.resolutions (type)";

pub const TABLE_PROCESSED: &str = r#"CREATE TABLE IF NOT EXISTS tessera_voting.processed (
    id UUID PRIMARY KEY
)"#;

// Votes cascade from both parents: deleting a resolution discards its
// tally, and evicting a zero-power voter must not strand vote rows.
pub const TABLE_VOTES: &str = r#"CREATE TABLE IF NOT EXISTS tessera_voting.votes (
    resolution_id UUID NOT NULL REFERENCES tessera_voting.resolutions (id) ON DELETE CASCADE,
    voter_id UUID NOT NULL REFERENCES tessera_voting.voters (id) ON DELETE CASCADE,
    PRIMARY KEY (resolution_id, voter_id)
)"#;

pub const TABLE_HEIGHT: &str = r#"CREATE TABLE IF NOT EXISTS tessera_voting.height (
    id INT2 PRIMARY KEY CHECK (id = 1),
    value INT8 NOT NULL
)"#;

pub const CREATE_RESOLUTION_TYPE: &str =
    "INSERT INTO tessera_voting.resolution_types (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING";

// Voter registry

pub const UPSERT_VOTER: &str = r#"INSERT INTO tessera_voting.voters (id, pub_key, power)
VALUES ($1, $2, $3)
ON CONFLICT (id) DO UPDATE SET power = $3"#;

pub const REMOVE_VOTER: &str = "DELETE FROM tessera_voting.voters WHERE id = $1";

pub const GET_VOTER_POWER: &str = "SELECT power FROM tessera_voting.voters WHERE id = $1";

pub const ALL_VOTERS: &str = "SELECT pub_key, power FROM tessera_voting.voters";

pub const TOTAL_POWER: &str = "SELECT SUM(power) AS total_power FROM tessera_voting.voters";

// Resolution lifecycle

pub const ENSURE_RESOLUTION_EXISTS: &str =
    r#"INSERT INTO tessera_voting.resolutions (id, expiration)
VALUES ($1, $2)
ON CONFLICT (id) DO NOTHING"#;

pub const ADD_VOTE: &str = r#"INSERT INTO tessera_voting.votes (resolution_id, voter_id)
VALUES ($1, $2)
ON CONFLICT (resolution_id, voter_id) DO NOTHING"#;

// The WHERE guard keeps a second proposer from overwriting an attached
// body; create_resolution refuses before reaching this point anyway.
pub const UPSERT_RESOLUTION: &str =
    r#"INSERT INTO tessera_voting.resolutions (id, body, type, expiration, proposer, double_proposer_vote)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (id) DO UPDATE
    SET body = $2, type = $3, expiration = $4, proposer = $5, double_proposer_vote = $6
    WHERE tessera_voting.resolutions.body IS NULL"#;

// Full-info selects, all decoding through the same row codec

pub const FULL_RESOLUTION_BY_ID: &str = r#"SELECT r.id, r.body, r.type, r.expiration,
    SUM(v.power) AS approved_power,
    ARRAY_AGG(INT8SEND(v.power) || v.pub_key) AS voters,
    r.proposer, r.double_proposer_vote
FROM tessera_voting.resolutions AS r
LEFT JOIN tessera_voting.votes AS vt ON r.id = vt.resolution_id
LEFT JOIN tessera_voting.voters AS v ON vt.voter_id = v.id
WHERE r.id = $1
GROUP BY r.id"#;

pub const FULL_RESOLUTIONS_BY_TYPE: &str = r#"SELECT r.id, r.body, r.type, r.expiration,
    SUM(v.power) AS approved_power,
    ARRAY_AGG(INT8SEND(v.power) || v.pub_key) AS voters,
    r.proposer, r.double_proposer_vote
FROM tessera_voting.resolutions AS r
LEFT JOIN tessera_voting.votes AS vt ON r.id = vt.resolution_id
LEFT JOIN tessera_voting.voters AS v ON vt.voter_id = v.id
WHERE r.type = $1
GROUP BY r.id"#;

pub const FULL_RESOLUTIONS_BY_EXPIRATION: &str = r#"SELECT r.id, r.body, r.type, r.expiration,
    SUM(v.power) AS approved_power,
    ARRAY_AGG(INT8SEND(v.power) || v.pub_key) AS voters,
    r.proposer, r.double_proposer_vote
FROM tessera_voting.resolutions AS r
LEFT JOIN tessera_voting.votes AS vt ON r.id = vt.resolution_id
LEFT JOIN tessera_voting.voters AS v ON vt.voter_id = v.id
WHERE r.expiration <= $1
    AND NOT EXISTS (SELECT 1 FROM tessera_voting.processed AS p WHERE p.id = r.id)
GROUP BY r.id"#;

pub const FULL_RESOLUTIONS_BY_POWER: &str = r#"SELECT r.id, r.body, r.type, r.expiration,
    SUM(v.power) AS approved_power,
    ARRAY_AGG(INT8SEND(v.power) || v.pub_key) AS voters,
    r.proposer, r.double_proposer_vote
FROM tessera_voting.resolutions AS r
LEFT JOIN tessera_voting.votes AS vt ON r.id = vt.resolution_id
LEFT JOIN tessera_voting.voters AS v ON vt.voter_id = v.id
WHERE r.type = $1
GROUP BY r.id
HAVING SUM(v.power) >= $2"#;

pub const RESOLUTION_IDS_BY_TYPE_AND_PROPOSER: &str =
    "SELECT id FROM tessera_voting.resolutions WHERE type = $1 AND proposer = $2";

// Point lookups

pub const HAS_VOTED: &str =
    "SELECT 1 FROM tessera_voting.votes WHERE resolution_id = $1 AND voter_id = $2";

pub const CONTAINS_BODY: &str =
    "SELECT body IS NOT NULL FROM tessera_voting.resolutions WHERE id = $1";

pub const ALREADY_PROCESSED: &str = "SELECT 1 FROM tessera_voting.processed WHERE id = $1";

// Terminal-state bookkeeping

pub const MARK_MANY_PROCESSED: &str = r#"INSERT INTO tessera_voting.processed (id)
SELECT UNNEST($1::UUID[])
ON CONFLICT (id) DO NOTHING"#;

pub const DELETE_RESOLUTIONS: &str =
    "DELETE FROM tessera_voting.resolutions WHERE id = ANY($1::UUID[])";

pub const FILTER_NOT_PROCESSED: &str = r#"SELECT u.id FROM UNNEST($1::UUID[]) AS u (id)
WHERE NOT EXISTS (SELECT 1 FROM tessera_voting.processed AS p WHERE p.id = u.id)"#;

pub const FILTER_EXISTS_NO_BODY: &str = r#"SELECT id FROM tessera_voting.resolutions
WHERE id = ANY($1::UUID[]) AND body IS NULL"#;

// Height watermark (single-row table)

pub const GET_HEIGHT: &str = "SELECT value FROM tessera_voting.height";

pub const UPDATE_HEIGHT: &str = r#"INSERT INTO tessera_voting.height (id, value)
VALUES (1, $1)
ON CONFLICT (id) DO UPDATE SET value = $1"#;
