pub mod admin;
pub mod cart;
pub mod checkout;
pub mod orders;
pub mod payments;
pub mod products;
pub mod webhooks;
