//! Public feed categories

/// A category broadcast stream
///
/// Each category is backed by its own public feed queue and can additionally
/// receive responses whose action implies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Deals,
    Duels,
    Offers,
    SexDigest,
    YellowPages,
    AuctionDigest,
}

impl Category {
    /// All categories in consumer restart order
    pub const ALL: [Category; 6] = [
        Category::Deals,
        Category::Duels,
        Category::Offers,
        Category::SexDigest,
        Category::YellowPages,
        Category::AuctionDigest,
    ];

    /// Queue and routing-key suffix of the feed
    pub fn feed_suffix(&self) -> &'static str {
        match self {
            Category::Deals => "deals",
            Category::Duels => "duels",
            Category::Offers => "offers",
            Category::SexDigest => "sex_digest",
            Category::YellowPages => "yellow_pages",
            Category::AuctionDigest => "au_digest",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.feed_suffix())
    }
}
