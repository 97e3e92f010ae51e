use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    #[sol(rpc)]
    interface IConfidentialWrapper {
        function confidentialBalanceOf(address account) external view returns (bytes32);

        function wrap(address to, uint256 amount) external;

        function unwrap(
            address from,
            address to,
            bytes32 encryptedAmount,
            bytes calldata inputProof
        ) external;

        function finalizeUnwrap(
            bytes32 burntAmount,
            uint64 burntAmountCleartext,
            bytes calldata decryptionProof
        ) external;

        function confidentialTransfer(
            address to,
            bytes32 encryptedAmount,
            bytes calldata inputProof
        ) external returns (bytes32);

        event UnwrapRequested(address indexed receiver, bytes32 amount);
        event UnwrapFinalized(address indexed receiver, bytes32 encryptedAmount, uint64 cleartextAmount);
    }

    #[sol(rpc)]
    interface IWrapperFactory {
        function createConfidentialToken(address erc20) external returns (address);
        function getConfidentialToken(address erc20) external view returns (address);

        event ConfidentialTokenCreated(address indexed erc20, address indexed wrapper);
    }
}
