mod community;
mod feed;
mod subscription;

pub use community::{
    create as create_community, get as get_community, list as list_communities, search as search_communities,
    update as update_community,
};
pub use feed::{get_community_feed, get_discover, get_timeline};
pub use subscription::{block as block_community, subscribe, unblock as unblock_community, unsubscribe};
