//! ドメイン層: 操作対象・操作結果・ブランチ名などの値
pub mod entities;
pub mod value_objects;
