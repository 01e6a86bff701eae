pub mod channel_confirmation_ui;
