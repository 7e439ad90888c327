use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IERC721 {
        function supportsInterface(bytes4 interfaceId) external view returns (bool);
        function balanceOf(address owner) external view returns (uint256);
        function name() external view returns (string);
        function symbol() external view returns (string);
        function totalSupply() external view returns (uint256);
        function tokenURI(uint256 tokenId) external view returns (string);
    }

    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
}
