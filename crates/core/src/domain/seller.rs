use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    Clothing,
    Jewellery,
    HomeDecor,
    Handicrafts,
    FoodAndSpices,
    BeautyAndWellness,
}

impl ProductCategory {
    pub const ALL: [ProductCategory; 6] = [
        Self::Clothing,
        Self::Jewellery,
        Self::HomeDecor,
        Self::Handicrafts,
        Self::FoodAndSpices,
        Self::BeautyAndWellness,
    ];

    /// Keyboard label; also the only accepted chat input for the category.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Clothing => "Clothing",
            Self::Jewellery => "Jewellery",
            Self::HomeDecor => "Home Decor",
            Self::Handicrafts => "Handicrafts",
            Self::FoodAndSpices => "Food & Spices",
            Self::BeautyAndWellness => "Beauty & Wellness",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clothing => "clothing",
            Self::Jewellery => "jewellery",
            Self::HomeDecor => "home_decor",
            Self::Handicrafts => "handicrafts",
            Self::FoodAndSpices => "food_and_spices",
            Self::BeautyAndWellness => "beauty_and_wellness",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|category| {
            category.as_str() == normalized || category.label().to_ascii_lowercase() == normalized
        })
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|category| category.label() == label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub name: String,
    pub image_url: String,
    pub description: String,
    pub category: ProductCategory,
    pub location: String,
    pub sells_online: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationDetails {
    pub full_name: String,
    pub phone: String,
    pub id_document_url: String,
    pub selfie_url: String,
    pub business_address: String,
    pub status: VerificationStatus,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreProfile {
    pub name: String,
    pub logo_url: String,
    pub description: String,
    pub category: ProductCategory,
    pub contact_phone: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustStory {
    pub title: String,
    pub story: String,
    pub media_url: String,
    pub workshop_photo_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    pub email: String,
    pub products: Vec<ProductRecord>,
    pub verification: Option<VerificationDetails>,
    pub store: Option<StoreProfile>,
    pub story: Option<TrustStory>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Seller {
    pub fn new(email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            email: email.into(),
            products: Vec::new(),
            verification: None,
            store: None,
            story: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn display_name(&self) -> &str {
        self.store.as_ref().map(|store| store.name.as_str()).unwrap_or(self.email.as_str())
    }

    /// Applies an update the same way the record store does, for rendering before persisting.
    pub fn apply(&mut self, update: &SellerUpdate) {
        match update {
            SellerUpdate::Verification(details) => self.verification = Some(details.clone()),
            SellerUpdate::Store(profile) => self.store = Some(profile.clone()),
            SellerUpdate::Story(story) => self.story = Some(story.clone()),
        }
    }
}

/// The named seller fields a flow may overwrite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum SellerUpdate {
    Verification(VerificationDetails),
    Store(StoreProfile),
    Story(TrustStory),
}

impl SellerUpdate {
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Verification(_) => "verification",
            Self::Store(_) => "store",
            Self::Story(_) => "story",
        }
    }
}

/// A product as shown to buyers browsing a category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedProduct {
    pub seller_email: String,
    pub seller_name: String,
    pub product: ProductRecord,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ProductCategory, Seller, SellerUpdate, TrustStory};

    #[test]
    fn category_labels_are_the_only_accepted_chat_input() {
        assert_eq!(ProductCategory::from_label("Clothing"), Some(ProductCategory::Clothing));
        assert_eq!(ProductCategory::from_label("Food & Spices"), Some(ProductCategory::FoodAndSpices));
        assert_eq!(ProductCategory::from_label("Toys"), None);
        assert_eq!(ProductCategory::from_label("clothing"), None);
    }

    #[test]
    fn category_storage_encoding_round_trips() {
        for category in ProductCategory::ALL {
            assert_eq!(ProductCategory::parse(category.as_str()), Some(category));
        }
    }

    #[test]
    fn display_name_falls_back_to_email_without_store() {
        let seller = Seller::new("seller@x.com", Utc::now());
        assert_eq!(seller.display_name(), "seller@x.com");
    }

    #[test]
    fn apply_overwrites_only_the_named_field() {
        let mut seller = Seller::new("seller@x.com", Utc::now());
        seller.apply(&SellerUpdate::Story(TrustStory {
            title: "Three generations of block printing".to_owned(),
            story: "My grandmother taught me.".to_owned(),
            media_url: "https://cdn.example/voice.ogg".to_owned(),
            workshop_photo_url: "https://cdn.example/workshop.jpg".to_owned(),
            created_at: Utc::now(),
        }));

        assert!(seller.story.is_some());
        assert!(seller.store.is_none());
        assert!(seller.verification.is_none());
    }
}
