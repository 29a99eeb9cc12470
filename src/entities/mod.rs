//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod cart;
pub mod cart_item;
pub mod category;
pub mod dining_table;
pub mod loyalty_transaction;
pub mod menu_item;
pub mod order;
pub mod order_item;
pub mod outbox_event;
pub mod restaurant;
pub mod review;
pub mod staff;
pub mod user_profile;

// Re-export specific types to avoid conflicts
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use category::{Entity as Category, Model as CategoryModel};
pub use dining_table::{Entity as DiningTable, Model as DiningTableModel};
pub use loyalty_transaction::{
    Entity as LoyaltyTransaction, LoyaltyTransactionType, Model as LoyaltyTransactionModel,
};
pub use menu_item::{Entity as MenuItem, Model as MenuItemModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentMethod};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use outbox_event::{Entity as OutboxEvent, Model as OutboxEventModel};
pub use restaurant::{Entity as Restaurant, Model as RestaurantModel};
pub use review::{Entity as Review, Model as ReviewModel};
pub use staff::{Entity as Staff, Model as StaffModel, StaffRole};
pub use user_profile::{Entity as UserProfile, Language, Model as UserProfileModel};
