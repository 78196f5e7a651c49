//! Read-only command classification.
//!
//! A closed allow-list: anything not listed is a write and goes to a primary.

/// Commands that never mutate store state and may be served by a replica.
const READ_ONLY_COMMANDS: &[&str] = &[
    // keys
    "exists", "type", "ttl", "pttl", "expiretime", "pexpiretime", "keys", "scan", "randomkey",
    "dump", "object", "touch",
    // strings
    "get", "mget", "getrange", "substr", "strlen", "getbit", "bitcount", "bitpos", "lcs",
    // hashes
    "hget", "hmget", "hgetall", "hkeys", "hvals", "hlen", "hexists", "hstrlen", "hscan",
    "hrandfield",
    // lists
    "lrange", "llen", "lindex", "lpos",
    // sets
    "smembers", "scard", "sismember", "smismember", "srandmember", "sscan", "sunion", "sinter",
    "sintercard", "sdiff",
    // sorted sets
    "zrange", "zrangebyscore", "zrangebylex", "zrevrange", "zrevrangebyscore", "zrevrangebylex",
    "zcard", "zscore", "zmscore", "zcount", "zlexcount", "zrank", "zrevrank", "zrandmember",
    "zscan", "zunion", "zinter", "zdiff",
    // hyperloglog, geo
    "pfcount", "geodist", "geohash", "geopos", "georadius_ro", "georadiusbymember_ro",
    "geosearch",
    // server
    "ping", "echo", "time", "info", "dbsize", "lastsave",
];

/// Whether `command` is read-only. Matching is on the lower-cased name.
pub fn is_read_only(command: &str) -> bool {
    let lower = command.to_ascii_lowercase();
    READ_ONLY_COMMANDS.contains(&lower.as_str())
}
