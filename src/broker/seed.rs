//! Knowledge written into an empty store on first start

pub const SEED_SOURCE: &str = "initial_seeding";

pub const BITCOIN_FACTS: &[&str] = &[
    "Bitcoin was created by Satoshi Nakamoto in 2009.",
    "Bitcoin has a maximum supply of 21 million coins.",
    "Bitcoin uses a proof-of-work consensus mechanism.",
    "Bitcoin blocks are mined approximately every 10 minutes.",
    "The smallest unit of Bitcoin is called a satoshi, equal to 0.00000001 BTC.",
];

pub const ORDINALS_KNOWLEDGE: &[&str] = &[
    "Ordinals are a way to assign unique identifiers to individual satoshis in Bitcoin.",
    "Ordinals allow for the creation of digital artifacts on Bitcoin through inscriptions.",
    "Ordinal theory was developed by Casey Rodarmor.",
    "Ordinal inscriptions store data directly on the Bitcoin blockchain.",
    "Rare satoshis include those from the genesis block and block reward halving events.",
];
